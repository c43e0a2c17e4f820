use axum::http::StatusCode;
use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD, Engine};
use dispatch_crm::api::{create_router_with_config, AppState, SecurityConfig};
use dispatch_crm::config::{Config, TelephonyKeys};
use dispatch_crm::db::Database;
use dispatch_crm::models::*;
use dispatch_crm::telephony::{sign_body, SIGNATURE_HEADER};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

struct Harness {
    server: TestServer,
    db: Database,
    city: NamedEntry,
    _media: TempDir,
}

fn setup_with(configure: impl FnOnce(&mut Config)) -> Harness {
    setup_secured(configure, SecurityConfig::disabled())
}

fn setup_secured(configure: impl FnOnce(&mut Config), security: SecurityConfig) -> Harness {
    let media = TempDir::new().expect("Failed to create media dir");
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let city = db.get_or_create_city("Saratov").expect("Failed to create city");

    let mut config = Config::for_tests(media.path().to_path_buf());
    configure(&mut config);

    let app = create_router_with_config(AppState::new(db.clone(), config), security);
    Harness {
        server: TestServer::new(app).expect("Failed to create test server"),
        db,
        city,
        _media: media,
    }
}

fn setup() -> Harness {
    setup_with(|_| {})
}

fn create_user(db: &Database, city_id: Uuid, login: &str, role: Role) -> User {
    db.create_user(CreateUserInput {
        city_id,
        name: login.to_string(),
        role,
        login: login.to_string(),
        password: "secret123".to_string(),
        is_active: true,
        note: None,
    })
    .expect("Failed to create user")
}

fn create_master(db: &Database, city_id: Uuid, login: &str) -> Master {
    db.create_master(CreateMasterInput {
        city_id,
        name: "Ivan Petrov".to_string(),
        birth_date: None,
        passport: None,
        phone: "79160001122".to_string(),
        is_active: true,
        chat_id: None,
        note: None,
        login: login.to_string(),
        password: "secret123".to_string(),
    })
    .expect("Failed to create master")
}

async fn login(server: &TestServer, login: &str) -> String {
    let response = server
        .post("/api/v1/auth/login")
        .json(&json!({ "login": login, "password": "secret123" }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()["token"]
        .as_str()
        .expect("token in login response")
        .to_string()
}

/// A request for `master_id` closed as done with total 500 and expense 100.
fn settled_payout(db: &Database, city_id: Uuid, master_id: Uuid) -> Payout {
    let request = db
        .create_request(CreateRequestInput {
            city_id,
            ad_channel_id: None,
            request_type_id: None,
            client_phone: "79161234567".to_string(),
            atc_phone: None,
            client_name: "Anna".to_string(),
            address: "Lenina 1".to_string(),
            meeting_date: chrono::Utc::now(),
            appliance_type: "Fridge".to_string(),
            problem: "Noisy".to_string(),
            status: None,
            master_id: Some(master_id),
            total: Some(dec!(500)),
            expense: Some(dec!(100)),
            master_comment: None,
            call_centre_name: "Olga".to_string(),
            call_centre_comment: None,
        })
        .expect("Failed to create request");
    db.update_request(
        request.id,
        UpdateRequestInput {
            status: Some(RequestStatus::Done),
            ..Default::default()
        },
    )
    .expect("Failed to close request");
    db.get_payout_by_request(request.id)
        .expect("Failed to load payout")
        .expect("Payout missing")
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn request_body(city_id: Uuid) -> Value {
    json!({
        "city_id": city_id,
        "client_phone": "+7 (916) 123-45-67",
        "client_name": "Anna",
        "address": "Lenina 1",
        "meeting_date": "2024-03-10T12:00:00Z",
        "appliance_type": "Washing machine",
        "problem": "Does not drain",
        "call_centre_name": "Olga"
    })
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok_without_authentication() {
        let h = setup();
        let response = h.server.get("/api/v1/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "ok");
    }

    #[tokio::test]
    async fn detailed_health_checks_the_database() {
        let h = setup();
        let response = h.server.get("/api/v1/health/detailed").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["database"], "ok");
        assert_eq!(body["telegram"], false);
    }

    #[tokio::test]
    async fn sets_security_headers() {
        let h = setup();
        let response = h.server.get("/api/v1/health").await;
        assert_eq!(response.header("x-content-type-options"), "nosniff");
        assert_eq!(response.header("x-frame-options"), "DENY");
    }
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn rejects_unauthenticated_requests() {
        let h = setup();
        let response = h.server.get("/api/v1/requests").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["code"], "AUTHENTICATION_REQUIRED");
    }

    #[tokio::test]
    async fn rejects_a_wrong_password() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);

        let response = h
            .server
            .post("/api/v1/auth/login")
            .json(&json!({ "login": "olga", "password": "wrong-password" }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_the_login_limit() {
        let h = setup_secured(|_| {}, SecurityConfig::with_login_rate_limit(2));
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);

        for (attempt, forwarded) in ["203.0.113.1", "203.0.113.2", "203.0.113.3"].iter().enumerate() {
            let response = h
                .server
                .post("/api/v1/auth/login")
                .add_header("X-Forwarded-For", *forwarded)
                .json(&json!({ "login": "olga", "password": "wrong-password" }))
                .await;
            if attempt < 2 {
                response.assert_status(StatusCode::UNAUTHORIZED);
            } else {
                response.assert_status(StatusCode::TOO_MANY_REQUESTS);
            }
        }
    }

    #[tokio::test]
    async fn refuses_inactive_accounts() {
        let h = setup();
        let user = create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        h.db.update_user(user.id, UpdateUserInput {
            is_active: Some(false),
            ..Default::default()
        })
        .expect("Failed to deactivate");

        let response = h
            .server
            .post("/api/v1/auth/login")
            .json(&json!({ "login": "olga", "password": "secret123" }))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn me_returns_the_principal() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;

        let response = h.server.get("/api/v1/auth/me").add_header("Authorization", bearer(&token)).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["login"], "olga");
        assert_eq!(body["role"], "callcentre");
    }

    #[tokio::test]
    async fn technicians_log_in_with_their_own_credentials() {
        let h = setup();
        create_master(&h.db, h.city.id, "ivan");
        let token = login(&h.server, "ivan").await;

        let response = h.server.get("/api/v1/auth/me").add_header("Authorization", bearer(&token)).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["role"], "master");
    }

    #[tokio::test]
    async fn rejects_a_tampered_token() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;
        let tampered = format!("{}0", token);

        h.server
            .get("/api/v1/auth/me")
            .add_header("Authorization", bearer(&tampered))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}

mod requests {
    use super::*;

    #[tokio::test]
    async fn call_centre_creates_a_waiting_request() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;

        let response = h
            .server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&token))
            .json(&request_body(h.city.id))
            .await;
        response.assert_status(StatusCode::CREATED);
        let request: ServiceRequest = response.json();
        assert_eq!(request.status, RequestStatus::Waiting);
        assert_eq!(request.client_phone, "79161234567");

        let incoming: Vec<ServiceRequest> = h
            .server
            .get("/api/v1/requests/incoming")
            .add_header("Authorization", bearer(&token))
            .await
            .json();
        assert_eq!(incoming.len(), 1);
    }

    #[tokio::test]
    async fn rejects_an_invalid_phone() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;

        let mut body = request_body(h.city.id);
        body["client_phone"] = json!("12");
        h.server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&token))
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn hides_requests_of_other_cities() {
        let h = setup();
        let other = h.db.get_or_create_city("Penza").expect("Failed");
        create_user(&h.db, other.id, "penza-director", Role::Director);
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);

        let olga = login(&h.server, "olga").await;
        let request: ServiceRequest = h
            .server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&olga))
            .json(&request_body(h.city.id))
            .await
            .json();

        let director = login(&h.server, "penza-director").await;
        let listed: Vec<ServiceRequest> = h
            .server
            .get("/api/v1/requests")
            .add_header("Authorization", bearer(&director))
            .await
            .json();
        assert!(listed.is_empty());

        h.server
            .get(&format!("/api/v1/requests/{}", request.id))
            .add_header("Authorization", bearer(&director))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn technicians_cannot_create_requests() {
        let h = setup();
        create_master(&h.db, h.city.id, "ivan");
        let token = login(&h.server, "ivan").await;

        h.server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&token))
            .json(&request_body(h.city.id))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn technicians_see_only_their_own_requests() {
        let h = setup();
        let master = create_master(&h.db, h.city.id, "ivan");
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let olga = login(&h.server, "olga").await;

        let mut assigned = request_body(h.city.id);
        assigned["master_id"] = json!(master.id);
        h.server.post("/api/v1/requests").add_header("Authorization", bearer(&olga)).json(&assigned).await;
        h.server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&olga))
            .json(&request_body(h.city.id))
            .await;

        let ivan = login(&h.server, "ivan").await;
        let listed: Vec<ServiceRequest> = h
            .server
            .get("/api/v1/requests")
            .add_header("Authorization", bearer(&ivan))
            .await
            .json();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].master_id, Some(master.id));
    }

    #[tokio::test]
    async fn ignores_client_supplied_derived_fields() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;

        let mut body = request_body(h.city.id);
        body["total"] = json!("1000.00");
        body["expense"] = json!("200.00");
        body["net"] = json!("5");
        body["technician_share"] = json!("5");

        let request: ServiceRequest = h
            .server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&token))
            .json(&body)
            .await
            .json();
        assert_eq!(request.net, Some(dec!(800.00)));
        assert_eq!(request.technician_share, Some(dec!(800.00)));
    }

    #[tokio::test]
    async fn uploads_files_to_a_request() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;
        let request: ServiceRequest = h
            .server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&token))
            .json(&request_body(h.city.id))
            .await
            .json();

        let response = h
            .server
            .post(&format!("/api/v1/requests/{}/files", request.id))
            .add_header("Authorization", bearer(&token))
            .json(&json!({
                "kind": "receipt",
                "file_name": "receipt 1.jpg",
                "content_base64": STANDARD.encode(b"jpeg bytes"),
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let file: RequestFile = response.json();
        assert_eq!(file.kind, FileKind::Receipt);
        assert!(file.stored_path.starts_with(&format!("requests/{}/", request.id)));

        let files: Vec<RequestFile> = h
            .server
            .get(&format!("/api/v1/requests/{}/files", request.id))
            .add_header("Authorization", bearer(&token))
            .await
            .json();
        assert_eq!(files.len(), 1);

        let download = h
            .server
            .get(&format!("/api/v1/requests/{}/files/{}", request.id, file.id))
            .add_header("Authorization", bearer(&token))
            .await;
        download.assert_status_ok();
        assert_eq!(download.header("content-type"), "image/jpeg");
        assert_eq!(download.as_bytes().as_ref(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn files_of_hidden_requests_cannot_be_downloaded() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;
        let request: ServiceRequest = h
            .server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&token))
            .json(&request_body(h.city.id))
            .await
            .json();
        let file: RequestFile = h
            .server
            .post(&format!("/api/v1/requests/{}/files", request.id))
            .add_header("Authorization", bearer(&token))
            .json(&json!({
                "kind": "audio",
                "file_name": "call.mp3",
                "content_base64": STANDARD.encode(b"mp3 bytes"),
            }))
            .await
            .json();

        let other_city = h.db.get_or_create_city("Samara").expect("Failed to create city");
        create_user(&h.db, other_city.id, "irina", Role::CallCentre);
        let outsider = login(&h.server, "irina").await;
        h.server
            .get(&format!("/api/v1/requests/{}/files/{}", request.id, file.id))
            .add_header("Authorization", bearer(&outsider))
            .await
            .assert_status_not_found();

        h.server
            .get(&format!("/api/v1/requests/{}/files/{}", request.id, Uuid::new_v4()))
            .add_header("Authorization", bearer(&token))
            .await
            .assert_status_not_found();
    }
}

mod settlement {
    use super::*;

    #[tokio::test]
    async fn closing_a_request_creates_one_payout_visible_to_the_technician() {
        let h = setup();
        let master = create_master(&h.db, h.city.id, "ivan");
        create_user(&h.db, h.city.id, "boss", Role::Director);
        let boss = login(&h.server, "boss").await;

        let mut body = request_body(h.city.id);
        body["master_id"] = json!(master.id);
        let request: ServiceRequest = h
            .server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&boss))
            .json(&body)
            .await
            .json();

        let ivan = login(&h.server, "ivan").await;
        for _ in 0..2 {
            h.server
                .put(&format!("/api/v1/requests/{}", request.id))
                .add_header("Authorization", bearer(&ivan))
                .json(&json!({ "status": "done", "total": "1000.00", "expense": "200.00" }))
                .await
                .assert_status_ok();
        }

        let payouts: Vec<Payout> = h
            .server
            .get("/api/v1/payouts")
            .add_header("Authorization", bearer(&ivan))
            .await
            .json();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].amount, dec!(800.00));
        assert_eq!(payouts[0].status, PayoutStatus::Pending);
    }

    #[tokio::test]
    async fn technicians_may_only_report_a_transfer() {
        let h = setup();
        let master = create_master(&h.db, h.city.id, "ivan");
        let payout = settled_payout(&h.db, h.city.id, master.id);

        let ivan = login(&h.server, "ivan").await;
        h.server
            .put(&format!("/api/v1/payouts/{}", payout.id))
            .add_header("Authorization", bearer(&ivan))
            .json(&json!({ "status": "confirmed" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let updated: Payout = h
            .server
            .put(&format!("/api/v1/payouts/{}", payout.id))
            .add_header("Authorization", bearer(&ivan))
            .json(&json!({ "status": "checking" }))
            .await
            .json();
        assert_eq!(updated.status, PayoutStatus::Checking);

        // Someone else's payout is invisible.
        let other = create_master(&h.db, h.city.id, "petr");
        let foreign_payout = settled_payout(&h.db, h.city.id, other.id);
        h.server
            .get(&format!("/api/v1/payouts/{}", foreign_payout.id))
            .add_header("Authorization", bearer(&ivan))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn technicians_attach_a_receipt_when_reporting_a_transfer() {
        let h = setup();
        let master = create_master(&h.db, h.city.id, "ivan");
        let payout = settled_payout(&h.db, h.city.id, master.id);
        let ivan = login(&h.server, "ivan").await;

        h.server
            .get(&format!("/api/v1/payouts/{}/receipt", payout.id))
            .add_header("Authorization", bearer(&ivan))
            .await
            .assert_status_not_found();

        let updated: Payout = h
            .server
            .put(&format!("/api/v1/payouts/{}", payout.id))
            .add_header("Authorization", bearer(&ivan))
            .json(&json!({
                "status": "checking",
                "receipt": {
                    "file_name": "transfer.png",
                    "content_base64": STANDARD.encode(b"png bytes"),
                },
            }))
            .await
            .json();
        assert_eq!(updated.status, PayoutStatus::Checking);
        let receipt_path = updated.receipt_path.expect("receipt stored");
        assert!(receipt_path.starts_with(&format!("payouts/{}/", payout.id)));

        let receipt = h
            .server
            .get(&format!("/api/v1/payouts/{}/receipt", payout.id))
            .add_header("Authorization", bearer(&ivan))
            .await;
        receipt.assert_status_ok();
        assert_eq!(receipt.header("content-type"), "image/png");
        assert_eq!(receipt.as_bytes().as_ref(), b"png bytes");
    }

    #[tokio::test]
    async fn rejects_an_empty_receipt() {
        let h = setup();
        let master = create_master(&h.db, h.city.id, "ivan");
        let payout = settled_payout(&h.db, h.city.id, master.id);
        let ivan = login(&h.server, "ivan").await;

        h.server
            .put(&format!("/api/v1/payouts/{}", payout.id))
            .add_header("Authorization", bearer(&ivan))
            .json(&json!({
                "status": "checking",
                "receipt": { "file_name": "transfer.png", "content_base64": "" },
            }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let unchanged = h.db.get_payout(payout.id).expect("Failed").expect("Missing");
        assert_eq!(unchanged.status, PayoutStatus::Pending);
        assert!(unchanged.receipt_path.is_none());
    }

    #[tokio::test]
    async fn technicians_cannot_reassign_requests() {
        let h = setup();
        let master = create_master(&h.db, h.city.id, "ivan");
        create_user(&h.db, h.city.id, "boss", Role::Director);
        let boss = login(&h.server, "boss").await;

        let mut body = request_body(h.city.id);
        body["master_id"] = json!(master.id);
        let request: ServiceRequest = h
            .server
            .post("/api/v1/requests")
            .add_header("Authorization", bearer(&boss))
            .json(&body)
            .await
            .json();

        let ivan = login(&h.server, "ivan").await;
        h.server
            .put(&format!("/api/v1/requests/{}", request.id))
            .add_header("Authorization", bearer(&ivan))
            .json(&json!({ "master_id": null }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}

mod people {
    use super::*;

    #[tokio::test]
    async fn directors_cannot_grant_admin() {
        let h = setup();
        create_user(&h.db, h.city.id, "boss", Role::Director);
        let boss = login(&h.server, "boss").await;

        h.server
            .post("/api/v1/users")
            .add_header("Authorization", bearer(&boss))
            .json(&json!({
                "city_id": h.city.id,
                "name": "Root",
                "role": "admin",
                "login": "root",
                "password": "secret123"
            }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn duplicate_logins_conflict() {
        let h = setup();
        create_user(&h.db, h.city.id, "boss", Role::Director);
        let boss = login(&h.server, "boss").await;

        let body = json!({
            "city_id": h.city.id,
            "name": "Olga",
            "role": "callcentre",
            "login": "boss",
            "password": "secret123"
        });
        h.server
            .post("/api/v1/users")
            .add_header("Authorization", bearer(&boss))
            .json(&body)
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn call_centre_cannot_manage_users() {
        let h = setup();
        create_user(&h.db, h.city.id, "olga", Role::CallCentre);
        let token = login(&h.server, "olga").await;

        h.server
            .get("/api/v1/users")
            .add_header("Authorization", bearer(&token))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn directors_register_technicians() {
        let h = setup();
        create_user(&h.db, h.city.id, "boss", Role::Director);
        let boss = login(&h.server, "boss").await;

        let response = h
            .server
            .post("/api/v1/masters")
            .add_header("Authorization", bearer(&boss))
            .json(&json!({
                "city_id": h.city.id,
                "name": "Ivan",
                "phone": "8 916 000 11 22",
                "login": "ivan",
                "password": "secret123"
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        assert_eq!(response.json::<Master>().phone, "79160001122");

        let active: Vec<Master> = h
            .server
            .get("/api/v1/masters/active")
            .add_header("Authorization", bearer(&boss))
            .await
            .json();
        assert_eq!(active.len(), 1);
    }
}

mod telephony {
    use super::*;

    fn call_body(from: &str, line: &str) -> Value {
        json!({
            "entry_id": "entry-1",
            "from": { "number": from },
            "to": { "number": "101", "line_number": line }
        })
    }

    fn register_line(h: &Harness) {
        h.db.create_city_phone(CityPhoneInput {
            city_id: h.city.id,
            phone: "78452000000".to_string(),
        })
        .expect("Failed to create city phone");
    }

    #[tokio::test]
    async fn incoming_call_creates_a_waiting_request() {
        let h = setup();
        register_line(&h);

        let response = h
            .server
            .post("/api/v1/telephony/incoming-call")
            .json(&call_body("79161234567", "78452000000"))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["created"], true);

        let id: Uuid = serde_json::from_value(body["request_id"].clone()).expect("request id");
        let request = h.db.get_request(id).expect("Failed").expect("Missing");
        assert_eq!(request.status, RequestStatus::Waiting);
        assert_eq!(request.city_id, h.city.id);
        assert_eq!(request.atc_phone.as_deref(), Some("78452000000"));
    }

    #[tokio::test]
    async fn repeat_calls_reuse_the_open_request() {
        let h = setup();
        register_line(&h);

        let first: Value = h
            .server
            .post("/api/v1/telephony/incoming-call")
            .json(&call_body("79161234567", "78452000000"))
            .await
            .json();
        let second: Value = h
            .server
            .post("/api/v1/telephony/incoming-call")
            .json(&call_body("89161234567", "78452000000"))
            .await
            .json();

        assert_eq!(second["created"], false);
        assert_eq!(first["request_id"], second["request_id"]);
    }

    #[tokio::test]
    async fn unknown_lines_are_unprocessable() {
        let h = setup();

        h.server
            .post("/api/v1/telephony/incoming-call")
            .json(&call_body("79161234567", "70000000000"))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn verifies_signatures_when_keys_are_configured() {
        let keys = TelephonyKeys {
            api_key: "key".to_string(),
            api_salt: "salt".to_string(),
        };
        let h = setup_with(|config| config.telephony = Some(keys.clone()));
        register_line(&h);

        let body = serde_json::to_vec(&call_body("79161234567", "78452000000")).expect("json");

        h.server
            .post("/api/v1/telephony/incoming-call")
            .bytes(body.clone().into())
            .content_type("application/json")
            .add_header(SIGNATURE_HEADER, "deadbeef")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        h.server
            .post("/api/v1/telephony/incoming-call")
            .bytes(body.clone().into())
            .content_type("application/json")
            .add_header(SIGNATURE_HEADER, sign_body(&keys, &body))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn recordings_are_attached_to_the_matching_request() {
        let h = setup();
        register_line(&h);
        let created: Value = h
            .server
            .post("/api/v1/telephony/incoming-call")
            .json(&call_body("79161234567", "78452000000"))
            .await
            .json();

        let upload = json!({
            "file_name": "79161234567_out.mp3",
            "content_base64": STANDARD.encode(vec![0u8; 2048]),
        });
        let response = h.server.post("/api/v1/telephony/recordings").json(&upload).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["outcome"], "attached");
        assert_eq!(body["request_id"], created["request_id"]);

        let again: Value = h
            .server
            .post("/api/v1/telephony/recordings")
            .json(&upload)
            .await
            .json();
        assert_eq!(again["outcome"], "already_attached");
    }
}

mod finance {
    use super::*;

    #[tokio::test]
    async fn summary_rejects_an_inverted_range() {
        let h = setup();
        create_user(&h.db, h.city.id, "boss", Role::Director);
        let boss = login(&h.server, "boss").await;

        h.server
            .get("/api/v1/transactions/summary")
            .add_query_param("start_date", "2024-03-10")
            .add_query_param("end_date", "2024-03-01")
            .add_header("Authorization", bearer(&boss))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn directors_record_transactions_in_their_city() {
        let h = setup();
        create_user(&h.db, h.city.id, "boss", Role::Director);
        let boss = login(&h.server, "boss").await;
        let rent = h
            .db
            .create_named(ReferenceKind::TransactionType, NamedEntryInput {
                name: "Rent".to_string(),
            })
            .expect("Failed");

        let response = h
            .server
            .post("/api/v1/transactions")
            .add_header("Authorization", bearer(&boss))
            .json(&json!({
                "city_id": h.city.id,
                "transaction_type_id": rent.id,
                "amount": "1500.00",
                "date": "2024-03-10"
            }))
            .await;
        response.assert_status(StatusCode::CREATED);

        let other = h.db.get_or_create_city("Penza").expect("Failed");
        h.server
            .post("/api/v1/transactions")
            .add_header("Authorization", bearer(&boss))
            .json(&json!({
                "city_id": other.id,
                "transaction_type_id": rent.id,
                "amount": "1.00"
            }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
