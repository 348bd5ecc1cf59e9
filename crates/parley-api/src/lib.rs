pub mod auth;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod rooms;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, patch, post},
};

pub use auth::{AppState, AppStateInner};

/// All authenticated chat routes.
pub fn chat_routes(state: AppState) -> Router {
    Router::new()
        .route("/chat/rooms", post(rooms::open_room))
        .route("/chat/my", get(rooms::my_rooms))
        .route("/chat/{room_id}/info", get(rooms::room_info))
        .route("/chat/{room_id}/participants", post(rooms::add_participant))
        .route("/chat/{room_id}/leave", patch(rooms::leave_room))
        .route("/chat/{room_id}/send", post(messages::send_message))
        .route("/chat/{room_id}/messages", get(messages::get_messages))
        .route(
            "/chat/{room_id}/message/{message_id}/retry",
            post(messages::retry_attachment),
        )
        .route(
            "/chat/{room_id}/message/{message_id}",
            delete(messages::delete_message),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use parley_chat::{ChatService, LocalObjectStore, Stager};
    use parley_db::Database;
    use parley_gateway::{Broker, Dispatcher};

    use super::*;

    const SECRET: &str = "test-secret";
    const BOUNDARY: &str = "parley-boundary";

    async fn app() -> Router {
        let tmp = std::env::temp_dir().join(format!("parley-api-{}", uuid::Uuid::new_v4()));
        let store = LocalObjectStore::new(tmp.join("objects"), "/files").await.unwrap();
        let chat = ChatService::new(
            Arc::new(Database::open_in_memory().unwrap()),
            Broker::Local(Dispatcher::new()),
            Arc::new(store),
            Stager::new(tmp.join("staging")).unwrap(),
        );
        chat_routes(Arc::new(AppStateInner {
            chat,
            jwt_secret: SECRET.to_string(),
            max_file_bytes: 1024,
        }))
    }

    fn bearer(user_id: i64) -> String {
        format!("Bearer {}", auth::create_token(SECRET, user_id, "tester").unwrap())
    }

    fn multipart(fields: &[(&str, &str)]) -> Body {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
        Body::from(body)
    }

    fn send(room: i64, user: i64, fields: &[(&str, &str)]) -> Request<Body> {
        Request::post(format!("/chat/{}/send", room))
            .header(header::AUTHORIZATION, bearer(user))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(multipart(fields))
            .unwrap()
    }

    async fn json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn requires_bearer_token() {
        let resp = app()
            .await
            .oneshot(Request::get("/chat/my").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn open_send_and_page() {
        let app = app().await;

        let resp = app
            .clone()
            .oneshot(
                Request::post("/chat/rooms")
                    .header(header::AUTHORIZATION, bearer(1))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title":"lobby"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let room = json(resp).await["chatId"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(send(room, 1, &[("message", "hi"), ("clientMessageId", "c-1")]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = app
            .clone()
            .oneshot(send(room, 1, &[("message", "  ")]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["code"], "VALIDATION_ERROR");

        let resp = app
            .clone()
            .oneshot(
                Request::get(format!("/chat/{}/messages?size=5", room))
                    .header(header::AUTHORIZATION, bearer(1))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let page = json(resp).await;
        assert_eq!(page["messages"].as_array().unwrap().len(), 1);
        assert_eq!(page["messages"][0]["content"], "hi");
        assert_eq!(page["messages"][0]["status"], "NORMAL");
        assert_eq!(page["hasNext"], false);
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let resp = app()
            .await
            .oneshot(send(77, 1, &[("message", "hello")]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(resp).await["code"], "CHAT_NOT_FOUND");
    }

    #[tokio::test]
    async fn half_a_cursor_is_rejected() {
        let resp = app()
            .await
            .oneshot(
                Request::get("/chat/1/messages?cursorMessageId=4")
                    .header(header::AUTHORIZATION, bearer(1))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_path_and_query_get_error_bodies() {
        let app = app().await;
        for uri in ["/chat/general/messages", "/chat/1/messages?size=-1"] {
            let resp = app
                .clone()
                .oneshot(
                    Request::get(uri)
                        .header(header::AUTHORIZATION, bearer(1))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
            let body = json(resp).await;
            assert_eq!(body["code"], "VALIDATION_ERROR", "{}", uri);
            assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
        }

        let resp = app
            .oneshot(
                Request::post("/chat/rooms")
                    .header(header::AUTHORIZATION, bearer(1))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["code"], "VALIDATION_ERROR");
    }
}
