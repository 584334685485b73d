//! S5-shaped scenario: a schema's persistent cache entry goes missing while
//! the database still exists upstream; rebuild-and-wait re-binds the mapping
//! within the bounded retry window and the record resolves successfully
//! (spec §8, scenario S5).

use logship_registry::derive_id;
use logship_testkit::test_registry;

#[tokio::test]
async fn wiped_binding_is_recovered_via_rebuild_and_wait() {
    let (_dir, registry, _store) = test_registry();

    let id = registry.get_or_create_schema("app1").await.unwrap();
    assert_eq!(registry.name_by_id(&id).unwrap().as_deref(), Some("app1"));

    registry.forget_binding_for_test(&id).unwrap();
    assert_eq!(registry.name_by_id(&id).unwrap(), None);

    let recovered = registry.rebuild_and_wait(&id).await.unwrap();
    assert_eq!(recovered.as_deref(), Some("app1"));
}

#[tokio::test]
async fn unknown_id_never_bound_gives_up_after_bound() {
    let (_dir, registry, _store) = test_registry();
    let id = derive_id("never-created");
    let result = registry.rebuild_and_wait(&id).await.unwrap();
    assert_eq!(result, None);
}
