use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use ke_backend::config::Config;
use ke_backend::rest::{create_router, AppState};

struct TestApp {
    router: Router,
    dir: TempDir,
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        data_dir: dir.path().join("data"),
        uploads_dir: dir.path().join("uploads"),
        frontend_dir: dir.path().join("frontend"),
        token_secret: Some("test-secret".into()),
        ..Config::default()
    }
}

async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    configure(&mut config);
    let state = AppState::init(config).await.unwrap();
    TestApp {
        router: create_router(state),
        dir,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn json(&self, req: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = self.send(req).await;
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(&self) -> String {
        let (status, body) = self
            .json(json_request(
                "POST",
                "/api/admin/login",
                json!({"username": "admin", "password": "admin1234"}),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }
}

fn json_request(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn basic(uri: &str, user: &str, pass: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode(format!("{user}:{pass}"))),
        )
        .body(Body::empty())
        .unwrap()
}

fn multipart_upload(token: &str, filename: &str, mime: &str, content: &[u8]) -> Request<Body> {
    let boundary = "XTESTBOUNDARYX";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/admin/upload")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn valid_contact() -> Value {
    json!({
        "nome": "Mario Rossi",
        "telefono": "333 1234567",
        "email": "mario@example.it",
        "note": "Preventivo fotovoltaico"
    })
}

#[tokio::test]
async fn health_reports_ok_with_security_headers() {
    let app = spawn_app().await;
    let (status, headers, body) = app.send(get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
    assert_eq!(headers["referrer-policy"], "no-referrer");
}

#[tokio::test]
async fn contact_submission_is_stored_and_reports_skipped_channels() {
    let app = spawn_app().await;
    let (status, body) = app
        .json(json_request("POST", "/api/contatti", valid_contact(), None))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ok"], true);
    assert_eq!(body["id"], 1);
    assert_eq!(body["notify"]["email"]["skipped"], true);
    assert_eq!(body["notify"]["email"]["reason"], "SMTP not configured");
    assert_eq!(body["notify"]["whatsapp"]["reason"], "Twilio not configured");

    let token = app.login().await;
    let (status, body) = app.json(get("/api/admin/contatti/1", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["row"]["nome"], "Mario Rossi");
    assert_eq!(body["row"]["azienda"], Value::Null);
}

#[tokio::test]
async fn invalid_email_is_rejected_without_storing() {
    let app = spawn_app().await;
    let mut contact = valid_contact();
    contact["email"] = json!("not-an-email");

    let (status, body) = app
        .json(json_request("POST", "/api/contatti", contact, None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Inserisci un'email valida.");

    let token = app.login().await;
    let (_, body) = app.json(get("/api/admin/contatti", Some(&token))).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn contact_listing_is_paginated_newest_first() {
    let app = spawn_app().await;
    for i in 0..3 {
        let mut contact = valid_contact();
        contact["nome"] = json!(format!("Cliente {i}"));
        app.send(json_request("POST", "/api/contatti", contact, None))
            .await;
    }
    let token = app.login().await;

    let (status, body) = app
        .json(get("/api/admin/contatti?page=2&limit=2", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 2);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["total"], 3);
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);
    assert_eq!(body["rows"][0]["nome"], "Cliente 0");

    let (_, body) = app
        .json(get("/api/admin/contatti?page=abc&limit=999", Some(&token)))
        .await;
    assert_eq!(body["page"], 1);
    assert_eq!(body["limit"], 100);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let app = spawn_app().await;
    let (status, body) = app
        .json(json_request(
            "POST",
            "/api/admin/login",
            json!({"username": "admin", "password": "wrong"}),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Credenziali non valide");
}

#[tokio::test]
async fn admin_api_requires_valid_token() {
    let app = spawn_app().await;

    let (status, body) = app.json(get("/api/admin/prodotti", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Auth required");

    let (status, body) = app.json(get("/api/admin/prodotti", Some("abc.def"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid session");

    let token = app.login().await;
    let (status, _) = app.json(get("/api/admin/prodotti", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(json_request("POST", "/api/admin/logout", json!({}), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn zero_ttl_tokens_are_expired_immediately() {
    let app = spawn_app_with(|c| c.token_ttl = Duration::ZERO).await;
    let token = app.login().await;
    let (status, body) = app.json(get("/api/admin/contatti", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Session expired");
}

#[tokio::test]
async fn products_crud_round() {
    let app = spawn_app().await;
    let token = app.login().await;

    let (status, a) = app
        .json(json_request(
            "POST",
            "/api/admin/prodotti",
            json!({"titolo": "A", "categoria": "Fotovoltaico", "bullets": "uno\n\n due "}),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, b) = app
        .json(json_request(
            "POST",
            "/api/admin/prodotti",
            json!({"titolo": "B"}),
            Some(&token),
        ))
        .await;
    let (a_id, b_id) = (a["id"].as_u64().unwrap(), b["id"].as_u64().unwrap());
    assert_eq!(b_id, a_id + 1);

    let (_, list) = app.json(get("/api/admin/prodotti", Some(&token))).await;
    assert_eq!(list["rows"][0]["titolo"], "B");
    assert_eq!(list["rows"][1]["bullets"], json!(["uno", "due"]));

    // Partial update keeps categoria and bullets.
    let (status, _) = app
        .json(json_request(
            "PUT",
            &format!("/api/admin/prodotti/{a_id}"),
            json!({"titolo": "A2"}),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, row) = app
        .json(get(&format!("/api/admin/prodotti/{a_id}"), Some(&token)))
        .await;
    assert_eq!(row["row"]["titolo"], "A2");
    assert_eq!(row["row"]["categoria"], "Fotovoltaico");
    assert_eq!(row["row"]["bullets"], json!(["uno", "due"]));

    let (_, public) = app.json(get("/api/public/prodotti", None)).await;
    assert_eq!(public["rows"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .json(json_request(
            "DELETE",
            &format!("/api/admin/prodotti/{b_id}"),
            json!({}),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (_, body) = app
        .json(json_request("DELETE", "/api/admin/prodotti/999", json!({}), Some(&token)))
        .await;
    assert_eq!(body["deleted"], 0);
}

#[tokio::test]
async fn content_errors_map_to_status_codes() {
    let app = spawn_app().await;
    let token = app.login().await;

    let (status, body) = app
        .json(json_request(
            "POST",
            "/api/admin/incentivi",
            json!({"titolo": "   "}),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Titolo obbligatorio");

    let (status, body) = app
        .json(json_request(
            "PUT",
            "/api/admin/incentivi/42",
            json!({"titolo": "X"}),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Incentivo non trovato");

    let (status, body) = app
        .json(get("/api/admin/prodotti/abc", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad request");

    let (status, _) = app
        .json(get("/api/admin/contatti/0", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn raw_post(
    uri: &str,
    content_type: Option<&str>,
    body: impl Into<Body>,
    token: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body.into()).unwrap()
}

#[tokio::test]
async fn malformed_bodies_use_the_error_format() {
    let app = spawn_app().await;
    let token = app.login().await;

    let (status, body) = app
        .json(raw_post("/api/contatti", None, valid_contact().to_string(), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Richiesta non valida");
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = app
        .json(raw_post(
            "/api/admin/prodotti",
            Some("application/json"),
            "not json",
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = app
        .json(raw_post(
            "/api/admin/prodotti",
            None,
            r#"{"titolo":"A"}"#,
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Richiesta non valida");

    let (status, body) = app
        .json(raw_post(
            "/api/admin/login",
            Some("application/json"),
            "[1,2",
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (_, body) = app.json(get("/api/admin/prodotti", Some(&token))).await;
    assert_eq!(body["rows"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn scalar_bullets_are_accepted() {
    let app = spawn_app().await;
    let token = app.login().await;

    let (status, body) = app
        .json(json_request(
            "POST",
            "/api/admin/prodotti",
            json!({"titolo": "A", "bullets": 5}),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["id"].as_u64().unwrap();

    let (_, body) = app
        .json(get(&format!("/api/admin/prodotti/{id}"), Some(&token)))
        .await;
    assert_eq!(body["row"]["bullets"], json!(["5"]));
}

#[tokio::test]
async fn incentives_use_camel_case_labels() {
    let app = spawn_app().await;
    let token = app.login().await;
    app.send(json_request(
        "POST",
        "/api/admin/incentivi",
        json!({"titolo": "Conto termico", "link1": "https://gse.it", "link1Label": "GSE"}),
        Some(&token),
    ))
    .await;

    let (_, body) = app.json(get("/api/public/incentivi", None)).await;
    assert_eq!(body["rows"][0]["link1Label"], "GSE");
    assert_eq!(body["rows"][0]["link2Label"], Value::Null);
}

#[tokio::test]
async fn upload_accepts_images_and_serves_them() {
    let app = spawn_app().await;
    let token = app.login().await;

    let (status, _, body) = app
        .send(multipart_upload(&token, "Foto.PNG", "image/png", b"\x89PNG fake"))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    let filename = body["filename"].as_str().unwrap();
    assert!(filename.ends_with(".png"));
    assert_eq!(body["url"], format!("/uploads/{filename}"));
    assert_eq!(body["mime"], "image/png");
    assert_eq!(body["size"], 9);
    assert!(app.dir.path().join("uploads").join(filename).exists());

    let (status, headers, served) = app.send(get(&format!("/uploads/{filename}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, b"\x89PNG fake");
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=0");
}

#[tokio::test]
async fn upload_rejects_other_types_and_oversized_files() {
    let app = spawn_app_with(|c| c.upload_max_bytes = 16).await;
    let token = app.login().await;

    let (status, body) = app
        .json(multipart_upload(&token, "page.html", "text/html", b"<p>"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Tipo file non supportato (solo immagini o PDF).");

    let (status, body) = app
        .json(multipart_upload(&token, "big.pdf", "application/pdf", &[b'x'; 64]))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "File troppo grande");

    let boundary = "XTESTBOUNDARYX";
    let no_file = Request::builder()
        .method("POST")
        .uri("/api/admin/upload")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{boundary}--\r\n"
        )))
        .unwrap();
    let (status, body) = app.json(no_file).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Nessun file caricato");
}

#[tokio::test]
async fn admin_page_requires_basic_auth() {
    let app = spawn_app().await;

    let (status, headers, body) = app.send(get("/admin", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Basic realm=\"Admin\"");
    assert_eq!(body, b"Auth required");

    let (status, _, body) = app.send(basic("/admin", "admin", "nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, b"Invalid credentials");

    app.send(json_request("POST", "/api/contatti", valid_contact(), None))
        .await;
    let (status, _, body) = app.send(basic("/admin", "admin", "admin1234")).await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("Mario Rossi"));
    assert!(html.contains("/admin/export.csv"));
}

#[tokio::test]
async fn admin_page_delete_redirects() {
    let app = spawn_app().await;
    app.send(json_request("POST", "/api/contatti", valid_contact(), None))
        .await;

    let auth = format!("Basic {}", STANDARD.encode("admin:admin1234"));
    let form = |id: &str| {
        Request::builder()
            .method("POST")
            .uri("/admin/delete")
            .header(header::AUTHORIZATION, auth.clone())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("id={id}")))
            .unwrap()
    };

    let (status, _, body) = app.send(form("zero")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"Bad request");

    let (status, headers, _) = app.send(form("1")).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers[header::LOCATION], "/admin");

    let token = app.login().await;
    let (_, body) = app.json(get("/api/admin/contatti", Some(&token))).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn csv_export_lists_contacts() {
    let app = spawn_app().await;
    let mut contact = valid_contact();
    contact["note"] = json!("prezzo; \"urgente\"");
    app.send(json_request("POST", "/api/contatti", contact, None))
        .await;

    let (status, headers, body) = app.send(basic("/admin/export.csv", "admin", "admin1234")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("contatti.csv"));

    let csv = String::from_utf8(body).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("id;created_at;nome;azienda;telefono;email;indirizzo;note")
    );
    let row = lines.next().unwrap();
    assert!(row.starts_with("1;"));
    assert!(row.ends_with(";\"prezzo; \"\"urgente\"\"\""));
}

#[tokio::test]
async fn public_endpoints_are_rate_limited() {
    let app = spawn_app_with(|c| c.rate_limit_max = 2).await;

    for _ in 0..2 {
        let (status, headers, _) = app
            .send(json_request("POST", "/api/contatti", json!({}), None))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers["ratelimit-limit"], "2");
    }

    let (status, headers, body) = app
        .send(json_request("POST", "/api/contatti", valid_contact(), None))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers["ratelimit-remaining"], "0");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "Troppe richieste, riprova più tardi.");

    // Unlimited routes are unaffected.
    let (status, _, _) = app.send(get("/api/public/prodotti", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cors_mirrors_origin_when_no_list_configured() {
    let app = spawn_app().await;
    let req = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://sito.example")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = app.send(req).await;
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://sito.example"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
}

#[tokio::test]
async fn frontend_is_served_as_fallback() {
    let app = spawn_app().await;
    let frontend = app.dir.path().join("frontend");
    std::fs::create_dir_all(&frontend).unwrap();
    std::fs::write(frontend.join("index.html"), "<h1>KE</h1>").unwrap();

    let (status, _, body) = app.send(get("/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>KE</h1>");

    let (status, _, _) = app.send(get("/missing.html", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn data_survives_restart() {
    let dir = TempDir::new().unwrap();
    let router = create_router(AppState::init(test_config(&dir)).await.unwrap());
    let app = TestApp { router, dir };
    app.send(json_request("POST", "/api/contatti", valid_contact(), None))
        .await;

    // Fresh state over the same directory.
    let router = create_router(AppState::init(test_config(&app.dir)).await.unwrap());
    let app = TestApp { router, ..app };
    let (status, body) = app
        .json(json_request("POST", "/api/contatti", valid_contact(), None))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 2);
}
