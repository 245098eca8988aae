#![allow(clippy::unwrap_used)]
// Integration tests for `ApiClient` and bus discovery using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use eclusa_bus::discovery::discover;
use eclusa_bus::{ApiClient, Error, HttpConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let client = ApiClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Snapshot reads ──────────────────────────────────────────────────

#[tokio::test]
async fn test_list_active_faults() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/faults"))
        .and(query_param("activeOnly", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 5,
                "plcId": 1,
                "plcName": "CLP-MONTANTE",
                "wordName": "DB10.W4",
                "bitOffset": 3,
                "eclusa": "A",
                "subsistema": "Comporta",
                "descricao": "Overpressure",
                "kind": "alarm",
                "active": true,
                "startedAt": "2026-03-01T08:00:00Z",
                "acknowledged": false
            }
        ])))
        .mount(&server)
        .await;

    let faults = client.list_faults(true).await.unwrap();

    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].id, 5);
    assert_eq!(faults[0].plc_name.as_deref(), Some("CLP-MONTANTE"));
    assert_eq!(faults[0].bit_offset, Some(3));
    assert_eq!(faults[0].subsystem.as_deref(), Some("Comporta"));
}

#[tokio::test]
async fn test_list_tags_for_plc() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/plcs/7/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 70, "plcId": 7, "name": "nivel_montante", "dataType": "REAL", "value": 3.25 },
            { "id": 71, "plcId": 7, "nome": "bomba_ligada", "tipo": "BOOL" }
        ])))
        .mount(&server)
        .await;

    let tags = client.list_tags(7).await.unwrap();

    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].value, Some(json!(3.25)));
    assert_eq!(tags[1].name, "bomba_ligada");
    assert_eq!(tags[1].data_type, "BOOL");
    assert_eq!(tags[1].value, None);
}

#[tokio::test]
async fn test_list_plcs() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/plcs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "name": "CLP-01", "address": "10.0.0.11", "connected": true },
            { "id": 2, "name": "CLP-02", "enabled": false, "lastError": "timeout" }
        ])))
        .mount(&server)
        .await;

    let plcs = client.list_plcs().await.unwrap();

    assert_eq!(plcs.len(), 2);
    assert!(plcs[0].connected);
    assert!(!plcs[1].enabled);
    assert_eq!(plcs[1].last_error.as_deref(), Some("timeout"));
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_acknowledge_fault() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/faults/5/acknowledge"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.acknowledge_fault(5).await.unwrap();
}

#[tokio::test]
async fn test_write_and_read_tag_value() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api/tags/70/value"))
        .and(body_json(json!({ "value": 42 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/tags/70/value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tagId": 70,
            "value": 42,
            "readAt": "2026-03-01T08:00:01Z"
        })))
        .mount(&server)
        .await;

    client.write_tag_value(70, &json!(42)).await.unwrap();
    let reading = client.read_tag_value(70).await.unwrap();

    assert_eq!(reading.tag_id, 70);
    assert_eq!(reading.value, json!(42));
    assert_eq!(reading.read_at.as_deref(), Some("2026-03-01T08:00:01Z"));
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    let config = HttpConfig::default().with_token(secrecy::SecretString::from("tok-123".to_owned()));
    let client = ApiClient::new(&server.uri(), &config).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/plcs"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.list_plcs().await.unwrap().is_empty());
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_discover_resolves_relative_bus_url() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/bus/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "/bus",
            "subjects": { "faults": "linha1.falhas" }
        })))
        .mount(&server)
        .await;

    let (url, info) = discover(&client).await.unwrap();

    assert_eq!(url.scheme(), "ws");
    assert_eq!(url.path(), "/bus");
    assert_eq!(info.subjects.get("faults").map(String::as_str), Some("linha1.falhas"));
}

// ── Error handling ──────────────────────────────────────────────────

#[tokio::test]
async fn test_error_body_message_is_surfaced() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/faults/99/acknowledge"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "mensagem": "Falha não encontrada" })),
        )
        .mount(&server)
        .await;

    let err = client.acknowledge_fault(99).await.unwrap_err();

    assert!(err.is_not_found());
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Falha não encontrada");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/plcs"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.list_plcs().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/plcs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.list_plcs().await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { ref body, .. } if body.contains("oops")));
}
