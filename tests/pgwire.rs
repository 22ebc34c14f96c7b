use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use chairtime::clock::{BusinessHours, FixedClock};
use chairtime::tenant::TenantManager;
use chairtime::wire;

const PASSWORD: &str = "chairtime";
const MONDAY: &str = "2024-01-08";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("chairtime_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let now = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
    let tm = Arc::new(TenantManager::new(
        dir,
        1000,
        BusinessHours::default(),
        Arc::new(FixedClock(now)),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn try_connect(addr: SocketAddr, db: &str, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("frontdesk")
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, db: &str) -> Client {
    try_connect(addr, db, PASSWORD).await.unwrap()
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

struct Salon {
    provider: Ulid,
    client: Ulid,
    cut: Ulid,
}

async fn seed(client: &Client) -> Salon {
    let salon = Salon {
        provider: Ulid::new(),
        client: Ulid::new(),
        cut: Ulid::new(),
    };
    client
        .simple_query(&format!("INSERT INTO providers VALUES ('{}', 'Anna')", salon.provider))
        .await
        .unwrap();
    client
        .simple_query(&format!("INSERT INTO clients VALUES ('{}', 'Walk-in')", salon.client))
        .await
        .unwrap();
    client
        .simple_query(&format!(
            "INSERT INTO services VALUES ('{}', '{}', 'Haircut', 'hair', 60, 2500)",
            salon.cut, salon.provider
        ))
        .await
        .unwrap();
    salon
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_flow_over_simple_protocol() {
    let addr = start_test_server().await;
    let client = connect(addr, "flow").await;
    let s = seed(&client).await;

    let slots = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE provider_id = '{}' AND date = '{MONDAY}' AND service_id = '{}'",
            s.provider, s.cut
        ),
    )
    .await;
    assert_eq!(slots.len(), 45);
    assert!(slots.iter().all(|r| r.get("status") == Some("free")));

    let booking = Ulid::new();
    client
        .simple_query(&format!(
            "INSERT INTO bookings VALUES ('{booking}', '{}', '{}', '{}', '{MONDAY}', '10:00')",
            s.provider, s.client, s.cut
        ))
        .await
        .unwrap();

    let slots = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE provider_id = '{}' AND date = '{MONDAY}' AND duration = 30",
            s.provider
        ),
    )
    .await;
    let at = |time: &str| slots.iter().find(|r| r.get("time") == Some(time)).unwrap();
    assert_eq!(at("10:00").get("status"), Some("forward_conflict"));
    assert_eq!(at("10:45").get("status"), Some("forward_conflict"));
    assert_eq!(at("10:45").get("blocked_by"), Some(booking.to_string().as_str()));
    assert_eq!(at("11:00").get("status"), Some("free"));

    let bookings = rows(&client, &format!("SELECT * FROM bookings WHERE client_id = '{}'", s.client)).await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].get("time"), Some("10:00"));
    assert_eq!(bookings[0].get("duration"), Some("60"));

    client
        .simple_query(&format!("DELETE FROM bookings WHERE id = '{booking}'"))
        .await
        .unwrap();
    let bookings = rows(&client, &format!("SELECT * FROM bookings WHERE provider_id = '{}'", s.provider)).await;
    assert!(bookings.is_empty());
}

#[tokio::test]
async fn conflicting_insert_reports_exclusion_violation() {
    let addr = start_test_server().await;
    let client = connect(addr, "conflict").await;
    let s = seed(&client).await;

    client
        .simple_query(&format!(
            "INSERT INTO bookings VALUES ('{}', '{}', '{}', '{}', '{MONDAY}', '11:00')",
            Ulid::new(),
            s.provider,
            s.client,
            s.cut
        ))
        .await
        .unwrap();

    // 10:15 + 60 minutes runs into the 11:00 booking.
    let err = client
        .simple_query(&format!(
            "INSERT INTO bookings VALUES ('{}', '{}', '{}', '{}', '{MONDAY}', '10:15')",
            Ulid::new(),
            s.provider,
            s.client,
            s.cut
        ))
        .await
        .err()
        .unwrap();
    assert_eq!(sqlstate(&err), Some("23P01"));
    let message = err.as_db_error().map(|db| db.message().to_string()).unwrap_or_default();
    assert!(message.contains("backward_conflict"), "unexpected message: {message}");

    // Saturday is off by default.
    let err = client
        .simple_query(&format!(
            "INSERT INTO bookings VALUES ('{}', '{}', '{}', '{}', '2024-01-13', '10:00')",
            Ulid::new(),
            s.provider,
            s.client,
            s.cut
        ))
        .await
        .err()
        .unwrap();
    assert_eq!(sqlstate(&err), Some("23P01"));
}

#[tokio::test]
async fn schedule_edits_over_the_wire() {
    let addr = start_test_server().await;
    let client = connect(addr, "schedule").await;
    let s = seed(&client).await;
    let p = s.provider;

    let toggled = rows(
        &client,
        &format!("SELECT * FROM toggle_date_override WHERE provider_id = '{p}' AND date = '2024-01-13'"),
    )
    .await;
    assert_eq!(toggled[0].get("is_working"), Some("t"));

    client
        .simple_query(&format!("INSERT INTO weekly_template VALUES ('{p}', 0, false)"))
        .await
        .unwrap();
    let template = rows(&client, &format!("SELECT * FROM weekly_template WHERE provider_id = '{p}'")).await;
    assert_eq!(template.len(), 7);
    assert_eq!(template[0].get("is_working"), Some("f"));

    let month = rows(
        &client,
        &format!("SELECT * FROM schedule WHERE provider_id = '{p}' AND year = 2024 AND month = 1"),
    )
    .await;
    assert_eq!(month.len(), 31);
    let saturday = month.iter().find(|r| r.get("date") == Some("2024-01-13")).unwrap();
    assert_eq!(saturday.get("is_working"), Some("t"));
    assert_eq!(saturday.get("overridden"), Some("t"));

    client
        .simple_query(&format!("DELETE FROM date_overrides WHERE provider_id = '{p}' AND date = '2024-01-13'"))
        .await
        .unwrap();
    let day = rows(
        &client,
        &format!("SELECT * FROM working_day WHERE provider_id = '{p}' AND date = '2024-01-13'"),
    )
    .await;
    assert_eq!(day[0].get("is_working"), Some("f"));
}

#[tokio::test]
async fn extended_protocol_availability() {
    let addr = start_test_server().await;
    let client = connect(addr, "extended").await;
    let s = seed(&client).await;

    let provider = s.provider.to_string();
    let rows = client
        .query(
            "SELECT * FROM availability WHERE provider_id = $1 AND date = $2 AND duration = 15",
            &[&provider, &MONDAY],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 45);
    let first_time: String = rows[0].get("time");
    let first_status: String = rows[0].get("status");
    assert_eq!(first_time, "10:00");
    assert_eq!(first_status, "free");
}

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let addr = start_test_server().await;
    let salon_a = connect(addr, "salon_a").await;
    let salon_b = connect(addr, "salon_b").await;
    seed(&salon_a).await;

    assert_eq!(rows(&salon_a, "SELECT * FROM providers").await.len(), 1);
    assert!(rows(&salon_b, "SELECT * FROM providers").await.is_empty());
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let addr = start_test_server().await;
    let client = connect(addr, "errors").await;

    let err = client
        .simple_query(&format!("SELECT * FROM weekly_template WHERE provider_id = '{}'", Ulid::new()))
        .await
        .err()
        .unwrap();
    assert_eq!(sqlstate(&err), Some("P0002"));

    let err = client.simple_query("SELECT * FROM nowhere").await.err().unwrap();
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn wrong_password_is_refused() {
    let addr = start_test_server().await;
    assert!(try_connect(addr, "auth", "not-the-password").await.is_err());
}
