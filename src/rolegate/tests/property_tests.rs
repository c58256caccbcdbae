//! Property-based checks of resolution through the engine

use proptest::prelude::*;
use rolegate::types::slug_grants;
use rolegate::{AuthzEngine, EntityRef, NewRole};

fn segment() -> impl Strategy<Value = String> {
    "[a-c]{1,2}"
}

fn slug() -> impl Strategy<Value = String> {
    proptest::collection::vec(segment(), 1..4).prop_map(|parts| parts.join("."))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_engine_agrees_with_linear_scan(
        direct in proptest::collection::vec(slug(), 0..4),
        via_role in proptest::collection::vec(slug(), 0..4),
        query in slug(),
    ) {
        tokio_test::block_on(async {
            let engine = AuthzEngine::in_memory().unwrap();
            let user = EntityRef::new("User", "prop");

            for held in &direct {
                engine.assign_permission(&user, &held.as_str().into()).await.unwrap();
            }

            let role = engine.create_role(NewRole::new("Carrier")).await.unwrap();
            for held in &via_role {
                engine
                    .assign_permission(&role.entity_ref(), &held.as_str().into())
                    .await
                    .unwrap();
            }
            engine.assign_role(&user, &(&role).into()).await.unwrap();

            let expected = direct.iter().chain(via_role.iter()).any(|held| slug_grants(held, &query));
            assert_eq!(engine.has_permission(&user, &query).await.unwrap(), expected);
        });
    }

    #[test]
    fn test_repeated_assignment_is_idempotent(held in slug(), repeats in 1usize..6) {
        tokio_test::block_on(async {
            let engine = AuthzEngine::in_memory().unwrap();
            let user = EntityRef::new("User", "prop");

            let mut created = 0;
            for _ in 0..repeats {
                if engine.assign_permission(&user, &held.as_str().into()).await.unwrap().is_some() {
                    created += 1;
                }
            }

            assert_eq!(created, 1);
            assert_eq!(engine.individual_permissions(&user).await.unwrap().len(), 1);
        });
    }
}
