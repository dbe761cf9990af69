use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_body_util::BodyExt;
use mock_server::{app, app_with, MockConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

const KEY: &str = "test-api-key";

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes: bytes::Bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn header<'a>(response: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Zotero-API-Key", KEY)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<String> {
    request(method, uri)
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .unwrap()
}

async fn send(app: &Router, req: Request<String>) -> axum::response::Response {
    app.clone().oneshot(req).await.unwrap()
}

/// Create one book and return its key and version.
async fn create_book(app: &Router, title: &str) -> (String, u64) {
    let resp = send(app, json_request("POST", "/users/1/items", json!([{"itemType": "book", "title": title}]))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let result = body_json(resp).await;
    let object = &result["successful"]["0"];
    (object["key"].as_str().unwrap().to_string(), object["version"].as_u64().unwrap())
}

// --- templates ---

#[tokio::test]
async fn item_template_for_known_type() {
    let resp = send(&app(), Request::get("/items/new?itemType=book").body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let template = body_json(resp).await;
    assert_eq!(template["itemType"], "book");
    assert_eq!(template["title"], "");
}

#[tokio::test]
async fn item_template_for_unknown_type_is_400() {
    let resp = send(&app(), Request::get("/items/new?itemType=widget").body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- writes ---

#[tokio::test]
async fn batch_write_reports_each_index() {
    let app = app();
    let resp = send(
        &app,
        json_request(
            "POST",
            "/users/1/items",
            json!([{"itemType": "book", "title": "A"}, {"itemType": "book", "foo": "bar"}]),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "Last-Modified-Version"), Some("1"));
    let result = body_json(resp).await;
    assert_eq!(result["successful"]["0"]["data"]["title"], "A");
    assert_eq!(result["success"]["0"], result["successful"]["0"]["key"]);
    assert_eq!(result["failed"]["1"]["code"], 400);
    assert_eq!(result["failed"]["1"]["message"], "Invalid property 'foo'");
}

#[tokio::test]
async fn write_without_key_is_403() {
    let req = Request::post("/users/1/items")
        .body(json!([{"itemType": "book"}]).to_string())
        .unwrap();
    let resp = send(&app(), req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn wrong_key_is_403_even_for_reads() {
    let req = Request::get("/users/1/items")
        .header("Zotero-API-Key", "nope")
        .body(String::new())
        .unwrap();
    assert_eq!(send(&app(), req).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn key_accepted_as_bearer_or_query() {
    let app = app();
    let bearer = Request::post("/users/1/collections")
        .header("Authorization", format!("Bearer {KEY}"))
        .body(json!([{"name": "c"}]).to_string())
        .unwrap();
    assert_eq!(send(&app, bearer).await.status(), StatusCode::OK);
    let query = Request::post(format!("/users/1/collections?key={KEY}"))
        .body(json!([{"name": "d"}]).to_string())
        .unwrap();
    assert_eq!(send(&app, query).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn v3_requires_bare_array_and_v2_the_wrapper() {
    let app = app();
    let wrapped = json!({"items": [{"itemType": "book"}]});
    let resp = send(&app, json_request("POST", "/users/1/items", wrapped.clone())).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = request("POST", "/users/1/items")
        .header("Zotero-API-Version", "2")
        .body(wrapped.to_string())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "Zotero-API-Version"), Some("2"));
    let result = body_json(resp).await;
    assert!(result.get("successful").is_none());
    assert!(result["success"]["0"].is_string());
}

#[tokio::test]
async fn too_many_objects_is_413() {
    let batch: Vec<Value> = (0..51).map(|_| json!({"name": "c"})).collect();
    let resp = send(&app(), json_request("POST", "/users/1/collections", Value::Array(batch))).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn stale_library_version_is_412() {
    let app = app();
    create_book(&app, "A").await;
    let req = request("POST", "/users/1/items")
        .header("If-Unmodified-Since-Version", "0")
        .body(json!([{"itemType": "book"}]).to_string())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::PRECONDITION_FAILED);
}

// --- single objects ---

#[tokio::test]
async fn get_object_json_and_atom() {
    let app = app();
    let (key, version) = create_book(&app, "Title & more").await;

    let resp = send(&app, request("GET", &format!("/users/1/items/{key}")).body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "Last-Modified-Version"), Some(version.to_string().as_str()));
    let object = body_json(resp).await;
    assert_eq!(object["data"]["title"], "Title & more");
    assert_eq!(object["library"]["type"], "user");

    let uri = format!("/users/1/items/{key}?format=atom&content=json");
    let resp = send(&app, request("GET", &uri).body(String::new()).unwrap()).await;
    assert_eq!(header(&resp, "Content-Type"), Some("application/atom+xml"));
    let xml = body_text(resp).await;
    assert!(xml.contains(&format!("<zapi:key>{key}</zapi:key>")));
    assert!(xml.contains("Title &amp; more"));
}

#[tokio::test]
async fn missing_object_is_404() {
    let resp = send(&app(), request("GET", "/users/1/items/ZZZZZZZZ").body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unmodified_object_is_304() {
    let app = app();
    let (key, version) = create_book(&app, "A").await;
    let req = request("GET", &format!("/users/1/items/{key}"))
        .header("If-Modified-Since-Version", version.to_string())
        .body(String::new())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn put_and_patch_enforce_preconditions() {
    let app = app();
    let (key, version) = create_book(&app, "A").await;
    let uri = format!("/users/1/items/{key}");

    let resp = send(&app, json_request("PATCH", &uri, json!({"title": "B"}))).await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_REQUIRED);

    let req = request("PATCH", &uri)
        .header("If-Unmodified-Since-Version", version.to_string())
        .body(json!({"title": "B"}).to_string())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let new_version: u64 = header(&resp, "Last-Modified-Version").unwrap().parse().unwrap();
    assert!(new_version > version);

    let req = request("PUT", &uri)
        .header("If-Unmodified-Since-Version", version.to_string())
        .body(json!({"itemType": "book", "title": "C"}).to_string())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::PRECONDITION_FAILED);

    let body = json!({"key": key, "version": new_version, "itemType": "book", "title": "C"});
    assert_eq!(send(&app, json_request("PUT", &uri, body)).await.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn delete_object_then_gone() {
    let app = app();
    let (key, version) = create_book(&app, "A").await;
    let uri = format!("/users/1/items/{key}");
    let req = request("DELETE", &uri)
        .header("If-Unmodified-Since-Version", version.to_string())
        .body(String::new())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::NO_CONTENT);
    let resp = send(&app, request("GET", &uri).body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multi_delete_needs_library_version() {
    let app = app();
    let (a, _) = create_book(&app, "A").await;
    let (b, version) = create_book(&app, "B").await;
    let uri = format!("/users/1/items?itemKey={a},{b}");
    let resp = send(&app, request("DELETE", &uri).body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_REQUIRED);

    let req = request("DELETE", &uri)
        .header("If-Unmodified-Since-Version", version.to_string())
        .body(String::new())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::NO_CONTENT);
    let resp = send(&app, request("GET", "/users/1/items?format=keys").body(String::new()).unwrap()).await;
    assert_eq!(body_text(resp).await, "");
}

// --- listings ---

#[tokio::test]
async fn keys_versions_and_since() {
    let app = app();
    let (a, _) = create_book(&app, "A").await;
    let (b, vb) = create_book(&app, "B").await;

    let resp = send(&app, request("GET", "/users/1/items?format=keys").body(String::new()).unwrap()).await;
    assert_eq!(header(&resp, "Total-Results"), Some("2"));
    let keys = body_text(resp).await;
    assert!(keys.lines().any(|k| k == a));
    assert!(keys.ends_with('\n'));

    let resp = send(&app, request("GET", "/users/1/items?format=versions&since=1").body(String::new()).unwrap()).await;
    assert_eq!(body_json(resp).await, json!({ b.as_str(): vb }));
}

#[tokio::test]
async fn pagination_sets_link_header() {
    let app = app();
    for title in ["A", "B", "C"] {
        create_book(&app, title).await;
    }
    let resp = send(&app, request("GET", "/users/1/items?limit=2").body(String::new()).unwrap()).await;
    assert_eq!(header(&resp, "Total-Results"), Some("3"));
    let link = header(&resp, "Link").unwrap().to_string();
    assert!(link.contains("rel=\"next\""));
    assert!(link.contains("start=2>; rel=\"last\""));
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn v2_lists_as_atom_feed() {
    let app = app();
    create_book(&app, "A").await;
    let resp = send(&app, request("GET", "/users/1/items?v=2").body(String::new()).unwrap()).await;
    assert_eq!(header(&resp, "Content-Type"), Some("application/atom+xml"));
    let xml = body_text(resp).await;
    assert!(xml.contains("<zapi:totalResults>1</zapi:totalResults>"));
    assert!(xml.contains("<zapi:apiVersion>2</zapi:apiVersion>"));
}

#[tokio::test]
async fn tags_listed_and_deleted() {
    let app = app();
    let body = json!([{"itemType": "book", "tags": [{"tag": "one"}, {"tag": "two"}]}]);
    send(&app, json_request("POST", "/users/1/items", body)).await;

    let resp = send(&app, request("GET", "/users/1/tags").body(String::new()).unwrap()).await;
    let tags = body_json(resp).await;
    assert_eq!(tags.as_array().unwrap().len(), 2);
    assert_eq!(tags[0]["meta"]["numItems"], 1);

    let req = request("DELETE", "/users/1/tags?tag=one%20%7C%7C%20two")
        .header("If-Unmodified-Since-Version", "1")
        .body(String::new())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::NO_CONTENT);
    let resp = send(&app, request("GET", "/users/1/tags").body(String::new()).unwrap()).await;
    assert_eq!(body_json(resp).await, json!([]));
}

// --- notifications ---

#[tokio::test]
async fn v3_notifications_are_one_base64_header() {
    let resp = send(&app(), json_request("POST", "/users/1/items", json!([{"itemType": "note"}]))).await;
    let encoded = header(&resp, "Zotero-Debug-Notifications").unwrap();
    let decoded: Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
    assert_eq!(decoded[0]["event"], "topicUpdated");
    assert_eq!(decoded[1]["topic"], "/users/1/items");
}

#[tokio::test]
async fn v2_notifications_are_one_header_each() {
    let req = request("POST", "/users/1/items?v=2")
        .body(json!({"items": [{"itemType": "note"}]}).to_string())
        .unwrap();
    let resp = send(&app(), req).await;
    let values: Vec<_> = resp.headers().get_all("Zotero-Debug-Notifications").iter().collect();
    assert_eq!(values.len(), 2);
}

// --- files ---

#[tokio::test]
async fn attachment_file_redirects() {
    let config = MockConfig {
        file_base_url: "https://files.test".to_string(),
        ..MockConfig::default()
    };
    let app = app_with(config);
    let body = json!([{"itemType": "attachment", "title": "PDF", "filename": "paper.pdf"}]);
    let result = body_json(send(&app, json_request("POST", "/users/1/items", body)).await).await;
    let key = result["success"]["0"].as_str().unwrap().to_string();

    let resp = send(&app, request("GET", &format!("/users/1/items/{key}/file")).body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        header(&resp, "Location"),
        Some(format!("https://files.test/users/1/{key}/paper.pdf").as_str())
    );
}

#[tokio::test]
async fn non_attachment_file_is_400() {
    let app = app();
    let (key, _) = create_book(&app, "A").await;
    let resp = send(&app, request("GET", &format!("/users/1/items/{key}/file")).body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- groups ---

fn admin(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Basic {}", STANDARD.encode("admin:admin-password")))
}

#[tokio::test]
async fn group_lifecycle() {
    let app = app();
    let missing = send(&app, request("GET", "/groups/1/items").body(String::new()).unwrap()).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let xml = r#"<group owner="1" name="Test Group" type="PublicClosed" libraryEditing="admins"/>"#;
    let resp = send(&app, admin("POST", "/groups").body(xml.to_string()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(header(&resp, "Location").unwrap().ends_with("/groups/1"));
    assert!(body_text(resp).await.contains("<zapi:groupID>1</zapi:groupID>"));

    let resp = send(&app, json_request("POST", "/groups/1/collections", json!([{"name": "c"}]))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&app, admin("DELETE", "/groups/1").body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = send(&app, request("GET", "/groups/1/collections").body(String::new()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn group_admin_needs_basic_auth() {
    let xml = r#"<group owner="1" name="G" type="Private"/>"#;
    let resp = send(&app(), request("POST", "/groups").body(xml.to_string()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
