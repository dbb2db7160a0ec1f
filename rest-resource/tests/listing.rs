//! Filtering, sorting and pagination over HTTP

mod common;

use axum::http::StatusCode;
use axum::Router;
use rest_resource::prelude::*;

use common::{encode, get};

fn pets() -> MemoryStorage {
    MemoryStorage::new().with_name("pets").with_records([
        json!({"name": "Tom", "species": "cat", "age": 3}),
        json!({"name": "Jerry", "species": "mouse", "age": 1}),
        json!({"name": "Spike", "species": "dog", "age": 5}),
        json!({"name": "Tyke", "species": "dog", "age": 1}),
        json!({"name": "Butch", "species": "cat", "age": 5}),
    ])
}

fn fields() -> ResourceFields {
    ResourceFields::new()
        .field(FieldDef::new("name", FieldType::String).required())
        .field(FieldDef::new("species", FieldType::String))
        .field(FieldDef::new("age", FieldType::Integer))
}

fn router(layer: OptionsLayer) -> Router {
    let mut api = RestApi::new("/api");
    api.register(RestHandler::builder(pets()).fields(fields()).options(layer))
        .unwrap();
    api.into_router()
}

fn names(body: &Value) -> Vec<&str> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|pet| pet["name"].as_str().unwrap())
        .collect()
}

fn where_uri(filter: &str) -> String {
    format!("/api/pets?where={}", encode(filter))
}

#[tokio::test]
async fn test_flat_where_is_equality() {
    let app = router(OptionsLayer::new().filters(["species"]));

    let response = get(&app, &where_uri(r#"{"species": "dog"}"#)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(names(&response.body), ["Spike", "Tyke"]);
}

#[tokio::test]
async fn test_operators_on_one_field_are_anded() {
    let app = router(OptionsLayer::new().filters(["age"]));

    let response = get(&app, &where_uri(r#"{"age": {"$gt": 1, "$lt": "5"}}"#)).await;
    assert_eq!(names(&response.body), ["Tom"]);
}

#[tokio::test]
async fn test_filters_combine_across_fields() {
    let app = router(OptionsLayer::new().filters(["species", "age"]));

    let response = get(
        &app,
        &where_uri(r#"{"species": {"$in": ["cat", "dog"]}, "age": 5}"#),
    )
    .await;
    assert_eq!(names(&response.body), ["Spike", "Butch"]);
}

#[tokio::test]
async fn test_or_and_text_operators() {
    let app = router(OptionsLayer::new().filters(["name"]));

    let response = get(
        &app,
        &where_uri(r#"{"name": {"$or": [{"$starts": "T"}, {"$like": "%ch"}]}}"#),
    )
    .await;
    assert_eq!(names(&response.body), ["Tom", "Tyke", "Butch"]);
}

#[tokio::test]
async fn test_unknown_filter_keys_are_ignored() {
    let app = router(OptionsLayer::new().filters(["species"]));

    let response = get(&app, &where_uri(r#"{"owner": "Mammy"}"#)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_malformed_where_falls_back_to_unfiltered() {
    let app = router(OptionsLayer::new().filters(["species"]));

    let response = get(&app, &where_uri("{species: dog")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_invalid_filter_value_is_bad_request() {
    let app = router(OptionsLayer::new().filters(["age"]));

    let response = get(&app, &where_uri(r#"{"age": {"$ge": "old"}}"#)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = get(&app, &where_uri(r#"{"age": {"$near": 3}}"#)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_filter_with_custom_operator_and_attribute() {
    let app = router(OptionsLayer::new().filters([
        MutationSpec::from(("older", json!({"field": "age", "operator": "$ge"}))),
    ]));

    let response = get(&app, &where_uri(r#"{"older": 5}"#)).await;
    assert_eq!(names(&response.body), ["Spike", "Butch"]);
}

#[tokio::test]
async fn test_sort_first_key_is_primary() {
    let app = router(OptionsLayer::new().sorting(["species", "age", "name"]));

    let response = get(&app, "/api/pets?sort=species,-age").await;
    assert_eq!(
        names(&response.body),
        ["Butch", "Tom", "Spike", "Tyke", "Jerry"]
    );
}

#[tokio::test]
async fn test_default_sort_applies_only_without_sort_param() {
    let app = router(OptionsLayer::new().sorting([
        MutationSpec::from(("age", json!({"default": "desc"}))),
        MutationSpec::from(("name", json!({"default": true}))),
    ]));

    let response = get(&app, "/api/pets").await;
    assert_eq!(
        names(&response.body),
        ["Butch", "Spike", "Tom", "Jerry", "Tyke"]
    );

    let response = get(&app, "/api/pets?sort=name").await;
    assert_eq!(
        names(&response.body),
        ["Butch", "Jerry", "Spike", "Tom", "Tyke"]
    );

    // Present but empty or unknown: stored order
    for uri in ["/api/pets?sort=", "/api/pets?sort=owner"] {
        let response = get(&app, uri).await;
        assert_eq!(
            names(&response.body),
            ["Tom", "Jerry", "Spike", "Tyke", "Butch"]
        );
    }
}

#[tokio::test]
async fn test_pagination_clamps_limit() {
    let app = router(OptionsLayer::new().limit(2).limit_max(3).sorting(["name"]));

    let response = get(&app, "/api/pets?sort=name&limit=100").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(names(&response.body), ["Butch", "Jerry", "Spike"]);
    assert_eq!(response.header("x-limit"), Some("3"));
    assert_eq!(response.header("x-total"), Some("5"));

    let response = get(&app, "/api/pets?sort=name&offset=4").await;
    assert_eq!(names(&response.body), ["Tyke"]);
    assert_eq!(response.header("x-limit"), Some("2"));
    assert_eq!(response.header("x-offset"), Some("4"));
}

#[tokio::test]
async fn test_bad_pagination_params() {
    let app = router(OptionsLayer::new().limit(2));

    for uri in ["/api/pets?offset=-1", "/api/pets?limit=two"] {
        let response = get(&app, uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["message"], "Pagination params are invalid");
    }
}

#[tokio::test]
async fn test_total_is_omitted_when_disabled() {
    let app = router(OptionsLayer::new().limit(2).limit_total(false));

    let response = get(&app, "/api/pets").await;
    assert_eq!(response.body.as_array().unwrap().len(), 2);
    assert!(response.header("x-total").is_none());
    assert_eq!(response.header("x-limit"), Some("2"));
}

#[tokio::test]
async fn test_filter_runs_before_pagination() {
    let app = router(OptionsLayer::new().limit(1).filters(["species"]));

    let response = get(&app, &format!("{}&offset=1", where_uri(r#"{"species": "cat"}"#))).await;
    assert_eq!(names(&response.body), ["Butch"]);
    assert_eq!(response.header("x-total"), Some("2"));
}

#[tokio::test]
async fn test_field_selection() {
    let app = router(OptionsLayer::new());

    let response = get(&app, "/api/pets/1?schema_only=name,age").await;
    assert_eq!(response.body, json!({"name": "Tom", "age": 3}));

    let response = get(&app, "/api/pets?schema_exclude=id,species,age").await;
    assert_eq!(response.body[1], json!({"name": "Jerry"}));
}
