use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use billet::tenant::TenantManager;
use billet::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("billet_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "billet".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("billet")
        .password("billet");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Data rows from a simple query, skipping command-complete messages.
fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn create_hotel(client: &tokio_postgres::Client) -> (Ulid, Ulid) {
    let hid = Ulid::new();
    let event = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO hotels (id, event_id, name, address) VALUES ('{hid}', '{event}', 'Grand Melia', 'Calle Mayor 1')"
        ))
        .await
        .unwrap();
    (hid, event)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn insert_room_materializes_beds() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, _) = create_hotel(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, hotel_id, number, room_type, capacity, default_bed_type) \
             VALUES ('{rid}', '{hid}', '101', 'TRIPLE', 3, 'SINGLE')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.get("room_id"), Some(rid.to_string().as_str()));
        assert_eq!(row.get("bed_type"), Some("SINGLE"));
        assert_eq!(row.get("status"), Some("AVAILABLE"));
    }
}

#[tokio::test]
async fn capacity_update_tops_up_beds() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, _) = create_hotel(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, hotel_id, number, room_type, capacity, default_bed_type) \
             VALUES ('{rid}', '{hid}', '101', 'DOUBLE', 2, 'QUEEN')"
        ))
        .await
        .unwrap();

    client
        .batch_execute(&format!("UPDATE rooms SET capacity = 5 WHERE id = '{rid}'"))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 5);

    // Shrinking capacity must not delete beds
    client
        .batch_execute(&format!("UPDATE rooms SET capacity = 1 WHERE id = '{rid}'"))
        .await
        .unwrap();
    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 5);
}

#[tokio::test]
async fn assignment_occupies_bed_and_conflicts() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, _) = create_hotel(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, hotel_id, number, room_type, capacity, default_bed_type) \
             VALUES ('{rid}', '{hid}', '101', 'SINGLE', 1, 'SINGLE')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    let bed_id = rows[0].get("id").unwrap().to_string();

    let aid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assignments (id, hotel_id, participant_id, bed_id, status) \
             VALUES ('{aid}', '{hid}', '{}', '{bed_id}', 'ACTIVE')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("status"), Some("OCCUPIED"));

    // Second assignment on the same bed must be rejected
    let result = client
        .batch_execute(&format!(
            "INSERT INTO assignments (id, hotel_id, participant_id, bed_id, status) \
             VALUES ('{}', '{hid}', '{}', '{bed_id}', 'ACTIVE')",
            Ulid::new(),
            Ulid::new()
        ))
        .await;
    assert!(result.is_err(), "double-claim should fail");
}

#[tokio::test]
async fn delete_assignment_frees_bed() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, _) = create_hotel(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, hotel_id, number, room_type, capacity, default_bed_type) \
             VALUES ('{rid}', '{hid}', '101', 'SINGLE', 1, 'KING')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    let bed_id = rows[0].get("id").unwrap().to_string();

    let aid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO assignments (id, hotel_id, participant_id, bed_id, status) \
             VALUES ('{aid}', '{hid}', '{}', '{bed_id}', 'ACTIVE')",
            Ulid::new()
        ))
        .await
        .unwrap();

    client
        .batch_execute(&format!("DELETE FROM assignments WHERE id = '{aid}'"))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("status"), Some("AVAILABLE"));
}

#[tokio::test]
async fn occupancy_report_over_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, event) = create_hotel(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, hotel_id, number, room_type, capacity, default_bed_type) \
             VALUES ('{rid}', '{hid}', '101', 'TRIPLE', 3, 'SINGLE')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM beds WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    let bed_id = rows[0].get("id").unwrap().to_string();

    client
        .batch_execute(&format!(
            "INSERT INTO assignments (id, hotel_id, participant_id, bed_id, event_id, status) \
             VALUES ('{}', '{hid}', '{}', '{bed_id}', '{event}', 'ACTIVE')",
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM occupancy WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("total_rooms"), Some("1"));
    assert_eq!(row.get("total_beds"), Some("3"));
    assert_eq!(row.get("assigned"), Some("1"));
    assert_eq!(row.get("available"), Some("2"));
    let pct: f64 = row.get("occupancy_pct").unwrap().parse().unwrap();
    assert!((pct - 100.0 / 3.0).abs() < 0.01);

    // Filtering by an unrelated event shows an empty hotel
    let other_event = Ulid::new();
    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM occupancy WHERE hotel_id = '{hid}' AND event_id = '{other_event}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("assigned"), Some("0"));
    assert_eq!(rows[0].get("available"), Some("3"));
}

#[tokio::test]
async fn select_hotels_includes_totals() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, _) = create_hotel(&client).await;
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, hotel_id, number, room_type, capacity, default_bed_type) \
             VALUES ('{}', '{hid}', '201', 'DOUBLE', 2, 'QUEEN')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM hotels WHERE id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("name"), Some("Grand Melia"));
    assert_eq!(row.get("total_beds"), Some("2"));
    assert_eq!(row.get("occupied_beds"), Some("0"));

    let room_types: serde_json::Value =
        serde_json::from_str(row.get("room_types").unwrap()).unwrap();
    assert_eq!(room_types["DOUBLE"], 1);
}

#[tokio::test]
async fn invalid_sql_reports_error() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let result = client.batch_execute("INSERT INTO nowhere (id) VALUES ('x')").await;
    assert!(result.is_err());

    // Connection survives the error
    let (hid, _) = create_hotel(&client).await;
    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM hotels WHERE id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn listen_and_unlisten_accepted() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, _) = create_hotel(&client).await;
    client
        .batch_execute(&format!("LISTEN hotel_{hid}"))
        .await
        .unwrap();
    client
        .batch_execute(&format!("UNLISTEN hotel_{hid}"))
        .await
        .unwrap();
    client.batch_execute("UNLISTEN *").await.unwrap();

    // Bad channel name is rejected
    let result = client.batch_execute("LISTEN kitchen_1").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn extended_protocol_with_params() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let (hid, _) = create_hotel(&client).await;
    let rid = Ulid::new();
    client
        .execute(
            "INSERT INTO rooms (id, hotel_id, number, room_type, capacity, default_bed_type) \
             VALUES ($1, $2, '305', 'SUITE', 4, 'KING')",
            &[&rid.to_string(), &hid.to_string()],
        )
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM rooms WHERE hotel_id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("number"), Some("305"));
    assert_eq!(rows[0].get("bed_count"), Some("4"));
}

#[tokio::test]
async fn tenants_are_isolated_over_wire() {
    let (addr, _tm) = start_test_server().await;

    let client_a = connect(addr).await;

    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("other")
        .user("billet")
        .password("billet");
    let (client_b, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let (hid, _) = create_hotel(&client_a).await;

    let rows = data_rows(
        client_b
            .simple_query(&format!("SELECT * FROM hotels WHERE id = '{hid}'"))
            .await
            .unwrap(),
    );
    assert!(rows.is_empty(), "hotel should not leak across tenants");
}
