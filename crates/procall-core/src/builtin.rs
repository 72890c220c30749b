//! The built-in `System` collection.
//!
//! Lets a client check that it reached a live host, and which collections the
//! host serves, without knowing anything about the engine behind it.
//!
//! | Function   | Arguments | Results                               |
//! |------------|-----------|---------------------------------------|
//! | `Ping`     |           | `String "pong"`                       |
//! | `Version`  |           | `String` crate version                |
//! | `Describe` |           | `String` JSON array of collections    |

use crate::registry::{CallContext, Collection, HandlerError, HandlerResult};
use crate::value::Value;
use crate::Result;
use std::sync::{Arc, OnceLock};

pub const SYSTEM_COLLECTION: &str = "System";

/// Build the collection plus the cell its `Describe` function reads.
///
/// The description covers the sealed registry, so the caller fills the cell
/// once every collection (this one included) is in place.
pub(crate) fn system_collection() -> Result<(Collection, Arc<OnceLock<String>>)> {
    let description = Arc::new(OnceLock::<String>::new());
    let describe = {
        let description = description.clone();
        move |_ctx: CallContext, _args: Vec<Value>| {
            let description = description.clone();
            async move {
                description
                    .get()
                    .map(|json| vec![Value::String(json.clone())])
                    .ok_or_else(|| {
                        HandlerError::Invariant("registry description missing".to_string())
                    })
            }
        }
    };

    let collection = Collection::new(SYSTEM_COLLECTION)
        .with_function("Ping", &[], ping)?
        .with_function("Version", &[], version)?
        .with_function("Describe", &[], describe)?;
    Ok((collection, description))
}

async fn ping(_ctx: CallContext, _args: Vec<Value>) -> HandlerResult {
    Ok(vec![Value::from("pong")])
}

async fn version(_ctx: CallContext, _args: Vec<Value>) -> HandlerResult {
    Ok(vec![Value::from(env!("CARGO_PKG_VERSION"))])
}
