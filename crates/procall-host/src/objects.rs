//! The `Objects` demo collection.
//!
//! Named string objects behind handles, so a client can drive the full
//! create / resolve / release cycle of the handle manager without an engine.
//!
//! | Function  | Arguments          | Results  |
//! |-----------|--------------------|----------|
//! | `Create`  | `String`           | `UInt64` |
//! | `Get`     | `UInt64`           | `String` |
//! | `Set`     | `UInt64`, `String` |          |
//! | `Release` | `UInt64`           |          |
//! | `Count`   |                    | `UInt64` |

use procall_core::registry::params;
use procall_core::{Collection, HandleTable, HandlerResult, Value, ValueType};
use std::sync::Arc;

pub const OBJECTS_COLLECTION: &str = "Objects";

type Objects = Arc<HandleTable<String>>;

pub fn collection() -> procall_core::Result<Collection> {
    let objects: Objects = Arc::new(HandleTable::new("object"));

    let for_create = objects.clone();
    let for_get = objects.clone();
    let for_set = objects.clone();
    let for_release = objects.clone();
    let for_count = objects;

    Collection::new(OBJECTS_COLLECTION)
        .with_function("Create", &[ValueType::String], move |_ctx, args| {
            create(for_create.clone(), args)
        })?
        .with_function("Get", &[ValueType::UInt64], move |_ctx, args| {
            get(for_get.clone(), args)
        })?
        .with_function(
            "Set",
            &[ValueType::UInt64, ValueType::String],
            move |_ctx, args| set(for_set.clone(), args),
        )?
        .with_function("Release", &[ValueType::UInt64], move |_ctx, args| {
            release(for_release.clone(), args)
        })?
        .with_function("Count", &[], move |_ctx, _args| count(for_count.clone()))
}

async fn create(objects: Objects, args: Vec<Value>) -> HandlerResult {
    let value = params::require_str(&args, 0)?.to_string();
    let handle = objects.create(value)?;
    Ok(vec![handle.into()])
}

async fn get(objects: Objects, args: Vec<Value>) -> HandlerResult {
    let handle = params::require_handle(&args, 0)?;
    let object = objects.resolve(handle).await?;
    Ok(vec![Value::String(object.clone())])
}

async fn set(objects: Objects, args: Vec<Value>) -> HandlerResult {
    let handle = params::require_handle(&args, 0)?;
    let value = params::require_str(&args, 1)?.to_string();
    let mut object = objects.resolve(handle).await?;
    *object = value;
    Ok(vec![])
}

async fn release(objects: Objects, args: Vec<Value>) -> HandlerResult {
    let handle = params::require_handle(&args, 0)?;
    objects.release(handle).await?;
    Ok(vec![])
}

async fn count(objects: Objects) -> HandlerResult {
    Ok(vec![Value::UInt64(objects.len() as u64)])
}
