//! HTTP route definitions.

mod health;
mod sync;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(sync::routes())
}

#[cfg(test)]
mod tests {
    use crate::{app, config::Config, AppState};
    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use listsync_engine::{row, MergeableStore, Schema};
    use tower::ServiceExt;

    fn router() -> Router {
        app(AppState::new(Config::local(Some("s3cret"))))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["groups"], 0);
    }

    #[tokio::test]
    async fn sync_routes_require_token() {
        let response = router()
            .oneshot(
                Request::get("/sync/family/snapshot?token=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_group_snapshot_is_not_found() {
        let response = router()
            .oneshot(
                Request::get("/sync/family/snapshot?token=s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn http_push_then_snapshot() {
        let router = router();

        let mut client = MergeableStore::new("phone", Schema::todo_app());
        client
            .set_row("lists", "L1", row([("title", "Groceries".into())]))
            .unwrap();
        let changes = serde_json::to_string(&client.take_outbox()).unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::post("/sync/family?token=s3cret")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(changes))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["rowsMerged"], 1);

        let response = router
            .oneshot(
                Request::get("/sync/family/snapshot?token=s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["groupId"], "family");
        assert_eq!(
            body["content"]["tables"]["lists"]["L1"]["cells"]["title"]["value"],
            "Groceries"
        );
    }

    #[tokio::test]
    async fn invalid_push_is_bad_request() {
        let body = r#"{"tables":{"lists":{"L1":{"cells":{"title":
            {"value":7,"time":{"counter":1,"replica":"phone"}}}}}}}"#;
        let response = router()
            .oneshot(
                Request::post("/sync/family?token=s3cret")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
