//! Pets API Example
//!
//! This example demonstrates:
//! - Declaring a resource over the in-memory storage
//! - Filters, sorting with a default order, and pagination
//! - A token-based authorization hook
//! - A custom action addressing a single resource
//! - Per-resource overrides from config.toml / REST_ environment variables
//!
//! Run with: cargo run --example pets-api
//!
//! Test with:
//!   curl -H 'authorization: demo' 'http://localhost:8080/api/pets?sort=-age&limit=2'
//!   curl -H 'authorization: demo' -G 'http://localhost:8080/api/pets' \
//!        --data-urlencode 'where={"species": {"$in": ["cat", "dog"]}}'
//!   curl -H 'authorization: demo' -X POST -d '{"name": "Nibbles", "species": "mouse"}' \
//!        http://localhost:8080/api/pets
//!   curl -H 'authorization: demo' -X POST http://localhost:8080/api/pets/2/adopt
//!   curl -H 'authorization: demo' -X DELETE -d '[1, 3]' http://localhost:8080/api/pets

use axum::{http::Method as HttpMethod, routing::get, Json};
use rest_resource::prelude::*;

const DEMO_TOKEN: &str = "demo";

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_for_service("pets-api")?;
    init_tracing(&config)?;

    let pets = MemoryStorage::new().with_name("pets").with_records([
        json!({"name": "Tom", "species": "cat", "age": 3}),
        json!({"name": "Jerry", "species": "mouse", "age": 1}),
        json!({"name": "Spike", "species": "dog", "age": 5}),
        json!({"name": "Tyke", "species": "dog", "age": 1}),
    ]);

    let fields = ResourceFields::new()
        .field(FieldDef::new("name", FieldType::String).required())
        .field(FieldDef::new("species", FieldType::String).required())
        .field(FieldDef::new("age", FieldType::Integer))
        .field(FieldDef::new("adopted", FieldType::Boolean));

    let mut api = RestApi::from_config(&config).authorize(|request: RestRequest| async move {
        let identity = request
            .header("authorization")
            .filter(|token| *token == DEMO_TOKEN)
            .map(|token| json!(token));
        Ok::<_, Error>(identity)
    });

    api.register(
        RestHandler::builder(pets)
            .fields(fields)
            .options(
                OptionsLayer::new()
                    .limit(20)
                    .limit_max(100)
                    .filters([
                        MutationSpec::from("name"),
                        MutationSpec::from("species"),
                        MutationSpec::from(("age", json!({"type": "integer"}))),
                        MutationSpec::from(("name_starts", json!({"field": "name", "operator": "$starts"}))),
                    ])
                    .sorting([
                        MutationSpec::from(("name", json!({"default": true}))),
                        MutationSpec::from("age"),
                    ])
                    .rate_limit(120, 60),
            )
            .action(
                "adopt",
                "{id}/adopt",
                [HttpMethod::POST],
                |request: RestRequest, ctx: Context<MemoryStorage>| async move {
                    let mut pet = ctx.resource.ok_or_else(Error::resource_not_found)?;
                    if pet["adopted"] == json!(true) {
                        return Err(Error::bad_request("Pet is already adopted"));
                    }
                    pet["adopted"] = json!(true);
                    let pet = ctx.storage.save(&request, pet, true).await?;
                    tracing::info!(pet = %pet["name"], "Pet adopted");
                    Ok::<_, Error>(pet)
                },
            ),
    )?;

    let app = Router::new()
        .route("/health", get(health))
        .merge(api.into_router());

    Server::new(config).serve(app).await?;
    shutdown_tracing();

    Ok(())
}
