#![cfg(feature = "rl")]

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use ds_learner::{
    adapters::{ReplayClient, RetryPolicy},
    domain::{PolicyVariables, Tensor, Transitions},
    config::AppConfig,
    model::{
        build_algorithm, model_handle, Algorithm, LinearActorCritic, LinearHyperParams, ModelDims,
        Policy,
    },
    services::{ActorHub, ActorHubHandle, ParameterServer, ServerState},
    StepOutcome, TrainingLoop,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Default)]
struct ReplayStub {
    samples: AtomicUsize,
    clears: AtomicUsize,
    updates: Mutex<Vec<Value>>,
}

async fn sample(State(stub): State<Arc<ReplayStub>>) -> String {
    if stub.samples.fetch_add(1, Ordering::SeqCst) < 3 {
        return String::new();
    }
    json!({
        "trans": [
            [[0.5], [-0.5]],
            [[0.25], [-0.25]],
            [[1.0], [0.0]],
            [[0.4], [-0.4]],
            [[false], [true]]
        ],
        "is_weights": [1.0, 0.5],
        "points": ["a", "b"]
    })
    .to_string()
}

async fn update(State(stub): State<Arc<ReplayStub>>, Json(body): Json<Value>) -> &'static str {
    stub.updates.lock().unwrap().push(body);
    "ok"
}

async fn clear(State(stub): State<Arc<ReplayStub>>) -> &'static str {
    stub.clears.fetch_add(1, Ordering::SeqCst);
    "ok"
}

async fn spawn_replay(stub: Arc<ReplayStub>) -> String {
    let app = Router::new()
        .route("/sample", get(sample))
        .route("/update", post(update))
        .route("/clear", get(clear))
        .with_state(stub);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn linear() -> Box<dyn Algorithm> {
    Box::new(LinearActorCritic::new(
        ModelDims {
            state_dim: 1,
            action_dim: 1,
        },
        LinearHyperParams::default(),
    ))
}

#[tokio::test]
async fn empty_samples_then_one_batch_trains_once_and_updates_once() {
    let stub = Arc::new(ReplayStub::default());
    let url = spawn_replay(stub.clone()).await;
    let retry = RetryPolicy {
        delay: Duration::from_millis(10),
        max_attempts: Some(5),
    };
    let replay = Arc::new(ReplayClient::with_base_url(&url, retry).unwrap());

    let algorithm = linear();
    let (publisher, reader) = model_handle(algorithm.snapshot().unwrap());
    let mut training = TrainingLoop::new(replay, algorithm, publisher);

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(training.step().await.unwrap());
    }

    assert_eq!(
        outcomes,
        vec![
            StepOutcome::NotReady,
            StepOutcome::NotReady,
            StepOutcome::NotReady,
            StepOutcome::Trained { step: 1 },
        ]
    );
    assert_eq!(stub.samples.load(Ordering::SeqCst), 4);
    assert_eq!(reader.step(), 1);

    let updates = stub.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["points"], json!(["a", "b"]));
    assert_eq!(updates[0]["td_errors"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn training_run_clears_replay_before_sampling() {
    let stub = Arc::new(ReplayStub::default());
    let url = spawn_replay(stub.clone()).await;
    let replay = Arc::new(ReplayClient::with_base_url(&url, RetryPolicy::default()).unwrap());

    let algorithm = linear();
    let (publisher, _reader) = model_handle(algorithm.snapshot().unwrap());
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let training = TrainingLoop::new(replay, algorithm, publisher).with_evaluation(Box::new(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    ));
    let task = tokio::spawn(training.run());

    for _ in 0..500 {
        if stub.updates.lock().unwrap().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    task.abort();

    assert_eq!(stub.clears.load(Ordering::SeqCst), 1);
    assert!(stub.updates.lock().unwrap().len() >= 3);
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

async fn spawn_hub() -> (SocketAddr, ActorHubHandle) {
    let hub = ActorHub::new();
    let handle = hub.handle();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(hub.serve(listener));
    (addr, handle)
}

async fn wait_for_actors(handle: &ActorHubHandle, expected: usize) -> Vec<SocketAddr> {
    for _ in 0..200 {
        let actors = handle.active_actors().await.unwrap();
        if actors.len() == expected {
            return actors;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub never reached {} actors", expected);
}

/// Collects formatted tracing output for assertions
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn broadcast_reaches_only_connected_actors() {
    let logs = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    // Current-thread runtime: hub tasks log through this subscriber
    let _guard = tracing::subscriber::set_default(subscriber);

    let (addr, hub) = spawn_hub().await;

    let mut first = connect_async(format!("ws://{}", addr)).await.unwrap().0;
    let mut second = connect_async(format!("ws://{}", addr)).await.unwrap().0;
    for actor in [&mut first, &mut second] {
        actor.send(Message::Text("actor".to_string())).await.unwrap();
        assert_eq!(
            actor.next().await.unwrap().unwrap(),
            Message::Text("reset".to_string())
        );
    }

    wait_for_actors(&hub, 2).await;
    let registered = logs.contents();
    assert!(registered.contains("1 active actors"));
    assert!(registered.contains("2 active actors"));
    assert!(registered.contains("[2]. 127.0.0.1 : "));

    first.close(None).await.unwrap();
    wait_for_actors(&hub, 1).await;
    let after_close = logs.contents();
    let tail = &after_close[registered.len()..];
    assert!(tail.contains("1 active actors"), "no registry log after close: {tail}");
    assert!(!tail.contains("[2]."));

    assert_eq!(hub.broadcast("reload").await.unwrap(), 1);
    assert_eq!(
        second.next().await.unwrap().unwrap(),
        Message::Text("reload".to_string())
    );
}

#[test]
fn configured_dims_size_the_model() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "environment:\n  state_dim: 8\n  action_dim: 2\n").unwrap();
    let config = AppConfig::load(Some(file.path())).unwrap();

    let mut algorithm =
        build_algorithm(&config.algorithm, config.environment.dims(), &config.agent_config)
            .unwrap();
    let transitions = Transitions {
        state: vec![vec![0.1; 8], vec![-0.1; 8]],
        action: vec![vec![0.5, -0.5], vec![0.0, 0.25]],
        reward: vec![1.0, 0.0],
        next_state: vec![vec![0.2; 8], vec![0.0; 8]],
        done: vec![0.0, 1.0],
    };

    let outcome = algorithm.train(&transitions, &[1.0, 1.0]).unwrap();
    assert_eq!(outcome.td_errors.len(), 2);
    let variables = algorithm.snapshot().unwrap().variables();
    assert_eq!(variables.0[0].shape(), &[8, 2]);
}

/// Every array of a snapshot is filled with its own step number
struct Uniform(u64);

impl Policy for Uniform {
    fn step(&self) -> u64 {
        self.0
    }

    fn variables(&self) -> PolicyVariables {
        let v = self.0 as f32;
        PolicyVariables(vec![
            Tensor::new(vec![4, 8], vec![v; 32]).unwrap(),
            Tensor::vector(vec![v; 8]),
            Tensor::vector(vec![v; 64]),
        ])
    }

    fn td_errors(&self, transitions: &Transitions) -> ds_learner::Result<Vec<f32>> {
        Ok(vec![0.0; transitions.len()])
    }

    fn choose_actions(&self, states: &[Vec<f32>]) -> ds_learner::Result<Vec<Vec<f32>>> {
        Ok(states.iter().map(|_| Vec::new()).collect())
    }
}

fn flatten(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten(v, out)),
        Value::Number(n) => out.push(n.as_f64().unwrap()),
        other => panic!("unexpected value {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn policy_variables_are_never_torn() {
    let (publisher, reader) = model_handle(Arc::new(Uniform(0)));
    let server = ParameterServer::new(ServerState::new(reader));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });

    let writer = tokio::spawn(async move {
        for step in 1..=2000u64 {
            publisher.publish(Arc::new(Uniform(step)));
            tokio::task::yield_now().await;
        }
    });

    let client = reqwest::Client::new();
    let url = format!("http://{}/policy_variables", addr);
    for _ in 0..100 {
        let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        let mut values = Vec::new();
        flatten(&body, &mut values);
        assert_eq!(values.len(), 32 + 8 + 64);
        assert!(values.iter().all(|v| *v == values[0]), "mixed snapshot");
    }

    writer.await.unwrap();
}
