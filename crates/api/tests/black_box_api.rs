use std::sync::Arc;

use heroes_api::app::{AppState, build_app};
use heroes_infra::queue::InMemoryJobBackend;
use heroes_infra::{JobQueue, MemoryStore};
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    backend: Arc<InMemoryJobBackend>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, on in-memory stores and an ephemeral port.
        let backend = Arc::new(InMemoryJobBackend::new());
        let queue = Arc::new(JobQueue::with_backend(backend.clone()));
        let app = build_app(AppState::new(MemoryStore::new(), queue));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            backend,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create(client: &reqwest::Client, srv: &TestServer, resource: &str, body: Value) -> Value {
    let res = client
        .post(srv.url(&format!("/v1/{resource}")))
        .json(&body)
        .send()
        .await
        .unwrap();
    if res.status() != StatusCode::OK {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        panic!("expected 200 OK from create {resource}, got {status} body={body}");
    }
    res.json().await.unwrap()
}

fn id_of(entity: &Value) -> String {
    entity["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_ok_and_request_id_is_generated() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let request_id = res.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(request_id.len(), 32);
}

#[tokio::test]
async fn hero_ability_is_returned_and_two_print_jobs_are_enqueued() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let flight = create(&client, &srv, "ability", json!({ "name": "Flight", "strength": 10 })).await;
    let hero = create(
        &client,
        &srv,
        "hero",
        json!({ "name": "Superman", "ability_id": flight["id"] }),
    )
    .await;
    let hero_id = id_of(&hero);

    let res = client
        .get(srv.url(&format!("/v1/hero/{hero_id}/ability")))
        .header("x-request-id", "req-superman")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-request-id"], "req-superman");
    let ability: Value = res.json().await.unwrap();
    assert_eq!(ability["id"], flight["id"]);
    assert_eq!(ability["name"], "Flight");
    assert_eq!(ability["strength"], 10);

    let jobs = srv.backend.pending().await;
    assert_eq!(jobs.len(), 2);
    assert_ne!(jobs[0].job_id, jobs[1].job_id);
    for job in &jobs {
        assert_eq!(job.job_name, "print_hero");
        assert_eq!(job.args, vec![json!(hero_id)]);
        assert_eq!(job.correlation_id.as_ref().unwrap().as_str(), "req-superman");
        assert_eq!(job.kwargs["correlation_id"], "req-superman");
    }
}

#[tokio::test]
async fn hero_without_ability_is_404_after_enqueueing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let hero = create(&client, &srv, "hero", json!({ "name": "Batman" })).await;
    let res = client
        .get(srv.url(&format!("/v1/hero/{}/ability", id_of(&hero))))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(srv.backend.pending().await.len(), 2);

    let res = client
        .get(srv.url(&format!("/v1/hero/{}/ability", heroes_core::EntityId::new())))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(srv.backend.pending().await.len(), 2);
}

#[tokio::test]
async fn patch_changes_only_the_given_fields() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let flight = create(&client, &srv, "ability", json!({ "name": "Flight", "strength": 10 })).await;
    let hero = create(
        &client,
        &srv,
        "hero",
        json!({ "name": "Superman", "ability_id": flight["id"] }),
    )
    .await;

    let res = client
        .patch(srv.url(&format!("/v1/hero/{}", id_of(&hero))))
        .json(&json!({ "name": "Clark" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let patched: Value = res.json().await.unwrap();
    assert_eq!(patched["name"], "Clark");
    assert_eq!(patched["ability_id"], flight["id"]);
    assert_eq!(patched["created_at"], hero["created_at"]);
    assert_ne!(patched["updated_at"], hero["updated_at"]);

    let res = client
        .patch(srv.url(&format!("/v1/hero/{}", id_of(&hero))))
        .json(&json!({ "ability_id": null }))
        .send()
        .await
        .unwrap();
    let detached: Value = res.json().await.unwrap();
    assert_eq!(detached["name"], "Clark");
    assert!(detached["ability_id"].is_null());
}

#[tokio::test]
async fn delete_hides_and_restore_brings_back() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let hero = create(&client, &srv, "hero", json!({ "name": "Superman" })).await;
    let url = srv.url(&format!("/v1/hero/{}", id_of(&hero)));

    let res = client.delete(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Item deleted successfully" }));

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let deleted: Vec<Value> = client
        .get(srv.url("/v1/hero/deleted"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0]["is_deleted"], true);
    assert!(deleted[0]["deleted_at"].is_string());

    let res = client.patch(format!("{url}/restore")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let restored: Value = res.json().await.unwrap();
    assert_eq!(restored["is_deleted"], false);
    assert!(restored["deleted_at"].is_null());

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let fetched: Value = res.json().await.unwrap();
    assert_eq!(fetched["name"], "Superman");
}

#[tokio::test]
async fn purge_removes_only_soft_deleted_rows() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let kept = create(&client, &srv, "ability", json!({ "name": "Flight", "strength": 10 })).await;
    let first = create(&client, &srv, "ability", json!({ "name": "Speed", "strength": 7 })).await;
    let second = create(&client, &srv, "ability", json!({ "name": "Heat", "strength": 3 })).await;

    // An active row cannot be purged.
    let res = client
        .delete(srv.url(&format!("/v1/ability/{}/purge", id_of(&kept))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    for ability in [&first, &second] {
        let res = client
            .delete(srv.url(&format!("/v1/ability/{}", id_of(ability))))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = client
        .delete(srv.url(&format!("/v1/ability/{}/purge", id_of(&first))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let purged: Value = res.json().await.unwrap();
    assert_eq!(purged["name"], "Speed");

    let res = client
        .patch(srv.url(&format!("/v1/ability/{}/restore", id_of(&first))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(srv.url("/v1/ability/purge")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let deleted: Vec<Value> = client
        .get(srv.url("/v1/ability/deleted"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(deleted.is_empty());

    let all: Vec<Value> = client
        .get(srv.url("/v1/ability/all"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0]["id"], kept["id"]);
}

#[tokio::test]
async fn hero_listing_filters_orders_and_paginates() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for name in ["Superman", "Batman", "Wonder Woman", "Supergirl"] {
        create(&client, &srv, "hero", json!({ "name": name })).await;
    }

    let page: Value = client
        .get(srv.url("/v1/hero?page=1&size=3"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 4);
    assert_eq!(page["pages"], 2);
    assert_eq!(page["page"], 1);
    assert_eq!(page["size"], 3);
    let names: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Batman", "Supergirl", "Superman"]);

    let page: Value = client
        .get(srv.url("/v1/hero?page=2&size=3"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["name"], "Wonder Woman");

    let supers: Vec<Value> = client
        .get(srv.url("/v1/hero/all?name__ilike=super%25&order_by=-name"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = supers.iter().map(|h| h["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Superman", "Supergirl"]);

    let found: Vec<Value> = client
        .get(srv.url("/v1/hero/all?search=WOMAN"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "Wonder Woman");
}

#[tokio::test]
async fn invalid_input_is_a_422_client_error() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let cases = [
        client.get(srv.url("/v1/hero?size=0")),
        client.get(srv.url("/v1/hero?page=0")),
        client.get(srv.url("/v1/hero?size=101")),
        client.get(srv.url("/v1/hero/all?order_by=power")),
        client.get(srv.url("/v1/hero/not-a-uuid")),
        client.post(srv.url("/v1/hero")).json(&json!({ "name": "  " })),
        client.post(srv.url("/v1/ability")).json(&json!({ "name": "Flight" })),
        client
            .post(srv.url("/v1/hero"))
            .header("content-type", "application/json")
            .body("{not json"),
    ];

    for request in cases {
        let res = request.send().await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "Client Error");
        assert!(body["message"].is_string());
    }
}

#[tokio::test]
async fn missing_rows_are_404_client_errors() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let missing = heroes_core::EntityId::new();

    let res = client
        .get(srv.url(&format!("/v1/ability/{missing}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Client Error");

    let res = client
        .patch(srv.url(&format!("/v1/hero/{missing}")))
        .json(&json!({ "name": "Nobody" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .delete(srv.url(&format!("/v1/hero/{missing}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_ability_reference_is_a_422_client_error() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let missing = heroes_core::EntityId::new();

    let res = client
        .post(srv.url("/v1/hero"))
        .json(&json!({ "name": "Superman", "ability_id": missing }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Client Error");

    let hero = create(&client, &srv, "hero", json!({ "name": "Superman" })).await;
    let res = client
        .patch(srv.url(&format!("/v1/hero/{}", id_of(&hero))))
        .json(&json!({ "ability_id": missing }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = client
        .get(srv.url("/v1/hero/all"))
        .send()
        .await
        .unwrap();
    let heroes: Value = res.json().await.unwrap();
    assert_eq!(heroes.as_array().map(Vec::len), Some(1));
    assert!(heroes[0]["ability_id"].is_null());
}
