//! Shared test schemas
//!
//! Schemas shaped like these tables:
//!
//! ```sql
//! CREATE TABLE simple ( id SERIAL, name TEXT );
//! CREATE TABLE audited ( id SERIAL, name TEXT, nickname TEXT, created_at BIGINT, updated_at BIGINT );
//! CREATE TABLE withdefaults ( id SERIAL, str_no_def TEXT, str_def TEXT, num_no_def INT, num_def INT );
//! CREATE TABLE withrelationships ( id SERIAL, name TEXT, my_simple INT, my_with_defaults INT );
//! ```

use serde_json::json;

use crate::schema::{AttributeDef, Registry, Schema};

pub fn simple() -> Schema {
    Schema::builder("Simple")
        .attribute("id", AttributeDef::number().auto_increment())
        .attribute("name", AttributeDef::string())
        .build()
}

pub fn audited() -> Schema {
    Schema::builder("Audited")
        .attribute("id", AttributeDef::number().auto_increment())
        .attribute("name", AttributeDef::string())
        .attribute("nickname", AttributeDef::string().allow_null())
        .attribute("created_at", AttributeDef::number().auto_created_at())
        .attribute("updated_at", AttributeDef::number().auto_updated_at())
        .build()
}

pub fn with_defaults() -> Schema {
    Schema::builder("WithDefaults")
        .attribute("id", AttributeDef::number().auto_increment())
        .attribute("str_no_def", AttributeDef::string())
        .attribute("str_def", AttributeDef::string().defaults_to("val"))
        .attribute("num_no_def", AttributeDef::number())
        .attribute("num_def", AttributeDef::number().defaults_to(77))
        .build()
}

pub fn with_relationships() -> Schema {
    Schema::builder("WithRelationships")
        .attribute("id", AttributeDef::number().auto_increment())
        .attribute("name", AttributeDef::string())
        .attribute("my_simple", AttributeDef::references("simple"))
        .attribute("my_with_defaults", AttributeDef::references("withdefaults"))
        .build()
}

pub fn json_holder() -> Schema {
    Schema::builder("JsonHolder")
        .attribute("id", AttributeDef::number().auto_increment())
        .attribute("data", AttributeDef::json().defaults_to(json!({ "tags": [] })))
        .build()
}

pub fn with_colour() -> Schema {
    Schema::builder("WithColour")
        .attribute("id", AttributeDef::number().auto_increment())
        .attribute(
            "colour",
            AttributeDef::string().allowed_values(vec![json!("red"), json!("green"), json!("blue")]),
        )
        .attribute(
            "shade",
            AttributeDef::string().allow_null().allowed_values(vec![json!("dark")]),
        )
        .build()
}

pub fn registry() -> Registry {
    match Registry::from_schemas([
        simple(),
        audited(),
        with_defaults(),
        with_relationships(),
        json_holder(),
        with_colour(),
    ]) {
        Ok(registry) => registry,
        Err(e) => panic!("test registry: {e}"),
    }
}
