#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use violation_monitor::backend::BackendClient;
use warp::http::StatusCode;
use warp::path::Tail;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection};

pub struct State {
    pub records: Value,
    pub line: Value,
    pub polygon: Value,
    pub speed_limit: u32,
    /// Paths answered with HTTP 500.
    pub failing: HashSet<String>,
    /// Paths answered only after the given delay.
    pub delays: HashMap<String, Duration>,
    pub gets: Vec<String>,
    pub posts: Vec<(String, Value)>,
    pub authorization: Vec<Option<String>>,
    pub subscribers: Vec<String>,
    pub users: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        State {
            records: json!([]),
            line: json!({ "x1": 10, "y1": 20, "x2": 30, "y2": 40 }),
            polygon: json!({
                "x1": 1, "y1": 2, "x2": 3, "y2": 4,
                "x3": 5, "y3": 6, "x4": 7, "y4": 8
            }),
            speed_limit: 60,
            failing: HashSet::new(),
            delays: HashMap::new(),
            gets: Vec::new(),
            posts: Vec::new(),
            authorization: Vec::new(),
            subscribers: Vec::new(),
            users: vec!["user".to_string()],
        }
    }
}

type Shared = Arc<Mutex<State>>;

/// In-process stand-in for the monitoring backend's REST API.
pub struct FakeBackend {
    pub state: Shared,
    pub url: Url,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(State::default()));
        let shared = state.clone();
        let with_state = warp::any().map(move || shared.clone());
        let gets = warp::get()
            .and(warp::path::tail())
            .and(warp::header::optional::<String>("authorization"))
            .and(with_state.clone())
            .and_then(|tail: Tail, auth: Option<String>, state: Shared| async move {
                pause(&state, tail.as_str()).await;
                let mut state = state.lock().unwrap();
                state.authorization.push(auth);
                Ok::<_, Rejection>(handle_get(tail.as_str(), &mut state))
            });
        let posts = warp::post()
            .and(warp::path::tail())
            .and(warp::body::json())
            .and(with_state)
            .and_then(|tail: Tail, body: Value, state: Shared| async move {
                pause(&state, tail.as_str()).await;
                let mut state = state.lock().unwrap();
                Ok::<_, Rejection>(handle_post(tail.as_str(), body, &mut state))
            });
        let (addr, server) = warp::serve(gets.or(posts)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        FakeBackend {
            state,
            url: Url::parse(&format!("http://{}", addr)).unwrap(),
        }
    }

    pub fn client(&self) -> BackendClient {
        BackendClient::new(self.url.clone()).unwrap()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail(&self, path: &str) {
        self.with(|s| s.failing.insert(path.to_string()));
    }

    pub fn recover(&self, path: &str) {
        self.with(|s| s.failing.remove(path));
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.with(|s| s.delays.insert(path.to_string(), delay));
    }

    pub fn get_count(&self, path: &str) -> usize {
        self.with(|s| s.gets.iter().filter(|p| *p == path).count())
    }
}

async fn pause(state: &Shared, path: &str) {
    let delay = state.lock().unwrap().delays.get(path).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

fn reply(status: StatusCode, body: Value) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(&body), status)
}

fn handle_get(path: &str, state: &mut State) -> WithStatus<Json> {
    state.gets.push(path.to_string());
    if state.failing.contains(path) {
        return reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "simulated failure" }));
    }
    match path {
        "vehicles" => reply(StatusCode::OK, state.records.clone()),
        "get_line" => reply(StatusCode::OK, state.line.clone()),
        "get_polygon" => reply(StatusCode::OK, state.polygon.clone()),
        "get_speed_limit" => reply(StatusCode::OK, json!({ "speed_limit": state.speed_limit })),
        "get_license_text/7" => reply(StatusCode::OK, json!({ "license_text": "KA-01-1234" })),
        "get_license_text/8" => reply(StatusCode::OK, json!({ "license_text": "" })),
        _ => reply(StatusCode::NOT_FOUND, json!({ "error": "Vehicle not found" })),
    }
}

fn handle_post(path: &str, body: Value, state: &mut State) -> WithStatus<Json> {
    state.posts.push((path.to_string(), body.clone()));
    if state.failing.contains(path) {
        return reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "simulated failure" }));
    }
    match path {
        "update_line" => {
            state.line = body;
            reply(StatusCode::OK, json!({ "message": "Line coordinates updated" }))
        }
        "update_polygon" => {
            state.polygon = body;
            reply(StatusCode::OK, json!({ "message": "Polygon coordinates updated" }))
        }
        "update_speed_limit" => match body["speed_limit"].as_u64() {
            Some(limit) => {
                state.speed_limit = limit as u32;
                reply(StatusCode::OK, json!({ "message": "Speed limit updated" }))
            }
            None => reply(StatusCode::BAD_REQUEST, json!({ "error": "Invalid data format" })),
        },
        "auth/login" => {
            if body["username"] == "user" && body["password"] == "password123" {
                reply(StatusCode::OK, json!({ "access_token": "token-for-user" }))
            } else {
                reply(StatusCode::UNAUTHORIZED, json!({ "error": "Invalid credentials" }))
            }
        }
        "auth/register" => {
            let username = body["username"].as_str().unwrap_or_default().to_string();
            if state.users.contains(&username) {
                reply(StatusCode::BAD_REQUEST, json!({ "message": "Username already exists" }))
            } else {
                state.users.push(username);
                reply(StatusCode::CREATED, json!({ "message": "User registered" }))
            }
        }
        "subscribe" => {
            let email = body["email"].as_str().unwrap_or_default().to_string();
            if state.subscribers.contains(&email) {
                reply(StatusCode::BAD_REQUEST, json!({ "message": "Already subscribed" }))
            } else {
                state.subscribers.push(email);
                reply(StatusCode::CREATED, json!({ "message": "Subscribed" }))
            }
        }
        _ => reply(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    }
}

pub fn record(id: u64, timestamp: &str, violations: &[&str]) -> Value {
    json!({
        "id": id,
        "timestamp": timestamp,
        "speed": 72,
        "violations": violations,
        "image_base64": null,
        "license_base64": null,
    })
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
