#![forbid(unsafe_code)]

use poem::Route;
use poem_openapi::OpenApiService;

use crate::api::hello::HelloApi;

pub mod hello;

// From cargo.toml.
pub const HELLO_VERSION: &str = env!("CARGO_PKG_VERSION");

// ***************************************************************************
//                                Route Table
// ***************************************************************************
// ---------------------------------------------------------------------------
// hello_routes:
// ---------------------------------------------------------------------------
/** Build the server's route table.  Every endpoint is declared on an OpenApi
 * struct and collected here; paths not listed fall through to poem's 404
 * and unlisted methods on a known path get a 405.
 */
pub fn hello_routes(title: &str) -> Route {
    let api_service =
        OpenApiService::new(HelloApi, title, HELLO_VERSION);
    Route::new().nest("/", api_service)
}
