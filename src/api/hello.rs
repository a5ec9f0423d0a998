#![forbid(unsafe_code)]

use poem_openapi::{OpenApi, payload::PlainText};

// The only response this server produces.
pub const GREETING: &str = "Hello";

// ***************************************************************************
//                             OpenAPI Endpoint
// ***************************************************************************
pub struct HelloApi;

#[OpenApi]
impl HelloApi {
    /// Returns the fixed greeting.
    #[oai(path = "/hello", method = "get")]
    async fn hello(&self) -> PlainText<String> {
        PlainText(GREETING.to_string())
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::{HelloApi, GREETING};

    #[tokio::test]
    async fn handler_returns_greeting() {
        let resp = HelloApi.hello().await;
        assert_eq!(resp.0, GREETING);
        assert_eq!(resp.0, "Hello");
    }
}
