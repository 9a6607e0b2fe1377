// Elasticsearch backend against a local server speaking the same REST verbs
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{any, head, post};
use axum::{Json, Router};
use permstore_lib::config::{AppConfig, ElasticsearchConfig};
use permstore_lib::{
    DocumentBackend, ElasticsearchBackend, Op, Permission, PermissionError, PermissionPatch,
    PermissionStorage, RequestContext, StoreSettings,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeCluster {
    indices: Mutex<HashMap<String, HashMap<String, Value>>>,
    created: AtomicUsize,
    required_auth: Option<String>,
}

type Shared = Arc<FakeCluster>;
type Reply = (StatusCode, Json<Value>);

fn es_error(status: StatusCode, kind: &str, reason: &str) -> Reply {
    (
        status,
        Json(json!({
            "error": {"type": kind, "reason": reason},
            "status": status.as_u16()
        })),
    )
}

fn authorized(cluster: &FakeCluster, headers: &HeaderMap) -> bool {
    match cluster.required_auth {
        Some(ref expected) => headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false),
        None => true,
    }
}

async fn index_head(
    State(cluster): State<Shared>,
    headers: HeaderMap,
    Path(index): Path<String>,
) -> StatusCode {
    if !authorized(&cluster, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if cluster.indices.lock().unwrap().contains_key(&index) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn index_create(
    State(cluster): State<Shared>,
    headers: HeaderMap,
    Path(index): Path<String>,
    body: String,
) -> Reply {
    if !authorized(&cluster, &headers) {
        return es_error(StatusCode::UNAUTHORIZED, "security_exception", "missing authentication");
    }
    if serde_json::from_str::<Value>(&body).is_err() {
        return es_error(
            StatusCode::BAD_REQUEST,
            "mapper_parsing_exception",
            "failed to parse mapping",
        );
    }
    let mut indices = cluster.indices.lock().unwrap();
    if indices.contains_key(&index) {
        return es_error(
            StatusCode::BAD_REQUEST,
            "resource_already_exists_exception",
            "index already exists",
        );
    }
    indices.insert(index.clone(), HashMap::new());
    cluster.created.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::OK,
        Json(json!({"acknowledged": true, "index": index})),
    )
}

fn apply_update(cluster: &FakeCluster, index: &str, id: &str, body: &Value) -> Reply {
    let mut indices = cluster.indices.lock().unwrap();
    let Some(docs) = indices.get_mut(index) else {
        return es_error(StatusCode::NOT_FOUND, "index_not_found_exception", "no such index");
    };
    let Some(Value::Object(doc)) = docs.get_mut(id) else {
        return es_error(
            StatusCode::NOT_FOUND,
            "document_missing_exception",
            "document missing",
        );
    };
    if let Some(Value::Object(fields)) = body.get("doc") {
        for (key, value) in fields {
            doc.insert(key.clone(), value.clone());
        }
    }
    (
        StatusCode::OK,
        Json(json!({"_index": index, "_id": id, "result": "updated"})),
    )
}

async fn typed_update(
    State(cluster): State<Shared>,
    Path((index, _ty, id)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Reply {
    apply_update(&cluster, &index, &id, &body)
}

async fn document(
    State(cluster): State<Shared>,
    method: axum::http::Method,
    Path((index, ty, id)): Path<(String, String, String)>,
    body: String,
) -> Reply {
    if method == axum::http::Method::POST {
        if ty != "_update" {
            return es_error(StatusCode::METHOD_NOT_ALLOWED, "illegal_argument", "unsupported");
        }
        let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        return apply_update(&cluster, &index, &id, &body);
    }

    let mut indices = cluster.indices.lock().unwrap();
    if method == axum::http::Method::PUT {
        let doc: Value = match serde_json::from_str(&body) {
            Ok(doc) => doc,
            Err(_) => {
                return es_error(StatusCode::BAD_REQUEST, "parse_exception", "bad body");
            }
        };
        let docs = indices.entry(index.clone()).or_default();
        let result = if docs.insert(id.clone(), doc).is_some() {
            "updated"
        } else {
            "created"
        };
        let status = if result == "created" {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        return (
            status,
            Json(json!({"_index": index, "_id": id, "result": result})),
        );
    }

    let Some(docs) = indices.get_mut(&index) else {
        return es_error(StatusCode::NOT_FOUND, "index_not_found_exception", "no such index");
    };

    if method == axum::http::Method::GET {
        return match docs.get(&id) {
            Some(doc) => (
                StatusCode::OK,
                Json(json!({"_index": index, "_id": id, "found": true, "_source": doc})),
            ),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"_index": index, "_id": id, "found": false})),
            ),
        };
    }

    if method == axum::http::Method::DELETE {
        return match docs.remove(&id) {
            Some(_) => (
                StatusCode::OK,
                Json(json!({"_index": index, "_id": id, "result": "deleted"})),
            ),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"_index": index, "_id": id, "result": "not_found"})),
            ),
        };
    }

    es_error(StatusCode::METHOD_NOT_ALLOWED, "illegal_argument", "unsupported")
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn fake_cluster(required_auth: Option<String>) -> (Shared, String) {
    let cluster = Arc::new(FakeCluster {
        required_auth,
        ..Default::default()
    });
    let app = Router::new()
        .route("/{index}", head(index_head).put(index_create))
        .route("/{index}/{ty}/{id}", any(document))
        .route("/{index}/{ty}/{id}/_update", post(typed_update))
        .with_state(cluster.clone());
    (cluster, serve(app).await)
}

fn es_config(url: &str) -> ElasticsearchConfig {
    ElasticsearchConfig {
        url: url.to_string(),
        timeout_secs: 5,
        ..Default::default()
    }
}

async fn storage_for(url: &str, settings: StoreSettings) -> PermissionStorage {
    let backend = ElasticsearchBackend::new(&es_config(url)).unwrap();
    PermissionStorage::initialize(Arc::new(backend), settings, &RequestContext::background())
        .await
        .unwrap()
}

#[tokio::test]
async fn initializes_index_once() {
    let (cluster, url) = fake_cluster(None).await;

    let mut config = AppConfig::default();
    config.elasticsearch = es_config(&url);
    config.index.name = "permissions".to_string();

    let ctx = RequestContext::background();
    PermissionStorage::connect(&config, &ctx).await.unwrap();
    PermissionStorage::connect(&config, &ctx).await.unwrap();

    assert_eq!(cluster.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn crud_over_http() {
    let (_, url) = fake_cluster(None).await;
    let storage = storage_for(&url, StoreSettings::new("permissions")).await;
    let ctx = RequestContext::background();

    let permission = Permission::new("jane doe/ops", Op::Read)
        .with_acl(["read"])
        .with_indices(["idx1"]);
    assert!(storage.put(&ctx, &permission).await.unwrap());
    assert_eq!(
        storage.get_permission(&ctx, "jane doe/ops").await.unwrap(),
        permission
    );

    storage
        .patch(&ctx, "jane doe/ops", &PermissionPatch::new().op(Op::Write))
        .await
        .unwrap();
    let loaded = storage.get_permission(&ctx, "jane doe/ops").await.unwrap();
    assert_eq!(loaded.op, Op::Write);
    assert_eq!(loaded.indices, vec!["idx1"]);
    assert!(loaded.acl.contains("read"));

    assert!(storage.delete(&ctx, "jane doe/ops").await.unwrap());
    assert!(storage
        .get(&ctx, "jane doe/ops")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn dot_usernames_never_reach_cluster() {
    let (cluster, url) = fake_cluster(None).await;
    let storage = storage_for(&url, StoreSettings::new("permissions")).await;
    let ctx = RequestContext::background();

    for name in [".", ".."] {
        assert!(matches!(
            storage.put(&ctx, &Permission::new(name, Op::Read)).await,
            Err(PermissionError::ValidationError(_))
        ));
        assert!(matches!(
            storage.delete(&ctx, name).await,
            Err(PermissionError::ValidationError(_))
        ));
    }

    let indices = cluster.indices.lock().unwrap();
    assert!(indices.get("permissions").map_or(true, |docs| docs.is_empty()));
}

#[tokio::test]
async fn typed_documents_use_legacy_update_path() {
    let (_, url) = fake_cluster(None).await;
    let storage = storage_for(
        &url,
        StoreSettings::new("permissions").with_doc_type("permission"),
    )
    .await;
    let ctx = RequestContext::background();

    storage
        .put(&ctx, &Permission::new("alice", Op::Read).with_acl(["docs"]))
        .await
        .unwrap();
    storage
        .patch(&ctx, "alice", &PermissionPatch::new().indices(["logs"]))
        .await
        .unwrap();

    let loaded = storage.get_permission(&ctx, "alice").await.unwrap();
    assert_eq!(loaded.indices, vec!["logs"]);
    assert!(loaded.acl.contains("docs"));
}

#[tokio::test]
async fn missing_documents_are_not_found() {
    let (_, url) = fake_cluster(None).await;
    let storage = storage_for(&url, StoreSettings::new("permissions")).await;
    let ctx = RequestContext::background();

    assert!(storage.get(&ctx, "ghost").await.unwrap_err().is_not_found());
    assert!(storage
        .patch(&ctx, "ghost", &PermissionPatch::new().op(Op::Delete))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(storage.delete(&ctx, "ghost").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn missing_index_is_backend_error_not_not_found() {
    let (_, url) = fake_cluster(None).await;
    let backend = ElasticsearchBackend::new(&es_config(&url)).unwrap();

    let err = backend
        .get_document("nowhere", "_doc", "alice")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        permstore_lib::DocumentError::Rejected { status: 404, .. }
    ));
}

#[tokio::test]
async fn rejected_mapping_is_schema_creation_error() {
    let (_, url) = fake_cluster(None).await;
    let backend = ElasticsearchBackend::new(&es_config(&url)).unwrap();

    let result = PermissionStorage::initialize(
        Arc::new(backend),
        StoreSettings::new("permissions").with_mapping("{not json"),
        &RequestContext::background(),
    )
    .await;
    match result {
        Err(PermissionError::SchemaCreationError(msg)) => {
            assert!(msg.contains("failed to parse mapping"))
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("initialization should fail"),
    }
}

#[tokio::test]
async fn unreachable_cluster_is_connection_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = ElasticsearchBackend::new(&es_config(&format!("http://{}", addr))).unwrap();
    let result = PermissionStorage::initialize(
        Arc::new(backend),
        StoreSettings::new("permissions"),
        &RequestContext::background(),
    )
    .await;
    assert!(matches!(result, Err(PermissionError::ConnectionError(_))));
}

#[tokio::test]
async fn basic_auth_is_sent() {
    let (cluster, url) = fake_cluster(Some("Basic ZWxhc3RpYzpzZWNyZXQ=".to_string())).await;

    let mut config = es_config(&url);
    let anonymous = ElasticsearchBackend::new(&config).unwrap();
    let err = anonymous.index_exists("permissions").await.unwrap_err();
    assert!(matches!(
        err,
        permstore_lib::DocumentError::Rejected { status: 401, .. }
    ));

    config.username = Some("elastic".to_string());
    config.password = Some("secret".to_string());
    let backend = ElasticsearchBackend::new(&config).unwrap();
    assert!(!backend.index_exists("permissions").await.unwrap());
    backend
        .create_index("permissions", permstore_lib::DEFAULT_MAPPING)
        .await
        .unwrap();
    assert_eq!(cluster.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_surface_as_backend_errors() {
    async fn failing() -> Reply {
        es_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "cluster_block_exception",
            "cluster is read-only",
        )
    }
    async fn exists() -> StatusCode {
        StatusCode::OK
    }

    let app = Router::new()
        .route("/{index}", head(exists))
        .route("/{index}/{ty}/{id}", any(failing));
    let url = serve(app).await;
    let storage = storage_for(&url, StoreSettings::new("permissions")).await;
    let ctx = RequestContext::background();

    let err = storage
        .put(&ctx, &Permission::new("alice", Op::Read))
        .await
        .unwrap_err();
    match err {
        PermissionError::BackendError(msg) => assert!(msg.contains("cluster is read-only")),
        other => panic!("unexpected error: {}", other),
    }
    assert!(matches!(
        storage.get(&ctx, "alice").await,
        Err(PermissionError::BackendError(_))
    ));
}

#[tokio::test]
async fn malformed_response_is_serialization_error() {
    async fn garbage() -> (StatusCode, &'static str) {
        (StatusCode::OK, "<html>proxy error</html>")
    }
    async fn exists() -> StatusCode {
        StatusCode::OK
    }

    let app = Router::new()
        .route("/{index}", head(exists))
        .route("/{index}/{ty}/{id}", any(garbage));
    let url = serve(app).await;
    let storage = storage_for(&url, StoreSettings::new("permissions")).await;

    let err = storage
        .get(&RequestContext::background(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, PermissionError::SerializationError(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_over_http() {
    let (cluster, url) = fake_cluster(None).await;
    let storage = storage_for(&url, StoreSettings::new("permissions")).await;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let storage = storage.clone();
            tokio::spawn(async move {
                let permission = Permission::new(format!("user-{}", i), Op::Read)
                    .with_acl([format!("acl-{}", i)]);
                storage.put(&RequestContext::background(), &permission).await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    assert_eq!(cluster.indices.lock().unwrap()["permissions"].len(), 16);

    let ctx = RequestContext::background();
    for i in 0..16 {
        let loaded = storage
            .get_permission(&ctx, &format!("user-{}", i))
            .await
            .unwrap();
        assert_eq!(loaded.acl.iter().next().unwrap(), &format!("acl-{}", i));
    }
}
