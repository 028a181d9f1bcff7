use serde_json::Value;

#[test]
fn openapi_describes_actor_and_notification_shapes() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = field_users::docs::build_openapi(8000);
    let v = serde_json::to_value(&doc)?;

    let schemas = v
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow::anyhow!("components.schemas must exist"))?;

    let actor = schemas
        .get("Actor")
        .and_then(|t| t.get("properties"))
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow::anyhow!("Actor schema must have properties"))?;
    for k in ["id", "email", "role", "parent_id", "is_active", "is_superuser"] {
        assert!(actor.contains_key(k), "OpenAPI Actor schema missing '{}'", k);
    }

    let page = schemas
        .get("NotificationPage")
        .and_then(|t| t.get("properties"))
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow::anyhow!("NotificationPage schema must have properties"))?;
    assert!(page.contains_key("count") && page.contains_key("results"));

    assert_eq!(v["servers"][0]["url"], "http://localhost:8000");
    Ok(())
}
