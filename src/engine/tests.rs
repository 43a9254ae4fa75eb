use std::sync::Arc;

use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::limits::*;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, d).unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("parklot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn vehicle(plate: &str) -> Vehicle {
    Vehicle {
        id: Ulid::new(),
        user_id: Ulid::new(),
        kind: "Car".into(),
        number_plate: plate.into(),
        make: "Toyota".into(),
        color: Some("Blue".into()),
    }
}

async fn add_lot(engine: &Engine, number: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .create_lot(id, number.into(), Some("Ground Floor".into()))
        .await
        .unwrap();
    id
}

async fn add_vehicle(engine: &Engine, plate: &str) -> Ulid {
    engine.register_vehicle(vehicle(plate)).await.unwrap().id
}

/// Engine with lots `L1`, `L2` and vehicles `V1`, `V2`.
async fn fixture(name: &str) -> (Engine, [Ulid; 2], [Ulid; 2]) {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let l1 = add_lot(&engine, "L1").await;
    let l2 = add_lot(&engine, "L2").await;
    let v1 = add_vehicle(&engine, "V1-PLATE").await;
    let v2 = add_vehicle(&engine, "V2-PLATE").await;
    (engine, [l1, l2], [v1, v2])
}

// ── Lifecycle scenarios ──────────────────────────────────

#[tokio::test]
async fn second_vehicle_on_booked_slot_rejected() {
    let (engine, [l1, _], [v1, v2]) = fixture("slot_booked.wal").await;
    let a1 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(5))
        .await
        .unwrap();

    let err = engine
        .create_allocation(Ulid::new(), v2, l1, day(3), day(7))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::SlotAlreadyBooked { conflicting, on_update: false } if conflicting == a1
    ));
    assert_eq!(engine.allocation_count(), 1);
}

#[tokio::test]
async fn same_vehicle_on_second_lot_rejected() {
    let (engine, [l1, l2], [v1, _]) = fixture("vehicle_busy.wal").await;
    let a1 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(5))
        .await
        .unwrap();

    let err = engine
        .create_allocation(Ulid::new(), v1, l2, day(4), day(6))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::VehicleAlreadyAllocated(id) if id == a1));
    assert!(err.to_string().contains("already allocated"));
}

#[tokio::test]
async fn different_lots_and_vehicles_coexist() {
    let (engine, [l1, l2], [v1, v2]) = fixture("coexist.wal").await;
    assert_ok!(engine.create_allocation(Ulid::new(), v1, l1, day(1), day(5)).await);
    assert_ok!(engine.create_allocation(Ulid::new(), v2, l2, day(1), day(5)).await);
    assert_eq!(engine.list_allocations().await.len(), 2);
}

#[tokio::test]
async fn touching_ranges_conflict() {
    let (engine, [l1, _], [v1, v2]) = fixture("touching.wal").await;
    engine
        .create_allocation(Ulid::new(), v1, l1, day(1), day(5))
        .await
        .unwrap();
    assert_err!(
        engine
            .create_allocation(Ulid::new(), v2, l1, day(5), day(9))
            .await
    );
    assert_ok!(
        engine
            .create_allocation(Ulid::new(), v2, l1, day(6), day(9))
            .await
    );
}

#[tokio::test]
async fn search_excludes_booked_lot() {
    let (engine, [l1, l2], [v1, _]) = fixture("search_excludes.wal").await;
    engine
        .create_allocation(Ulid::new(), v1, l1, day(1), day(5))
        .await
        .unwrap();

    let free = engine
        .search_available_lots(Some(day(2)), Some(day(3)))
        .await
        .unwrap();
    let ids: Vec<Ulid> = free.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![l2]);

    let later = engine
        .search_available_lots(Some(day(6)), Some(day(8)))
        .await
        .unwrap();
    assert_eq!(later.len(), 2);
}

#[tokio::test]
async fn search_requires_both_dates() {
    let (engine, _, _) = fixture("search_missing.wal").await;
    assert!(matches!(
        engine.search_available_lots(Some(day(1)), None).await,
        Err(EngineError::InvalidDateRange)
    ));
    assert!(matches!(
        engine.search_available_lots(Some(day(9)), Some(day(1))).await,
        Err(EngineError::InvalidDateRange)
    ));
}

#[tokio::test]
async fn update_does_not_conflict_with_itself() {
    let (engine, [l1, _], [v1, _]) = fixture("update_self.wal").await;
    let a1 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(5))
        .await
        .unwrap();

    let info = engine
        .update_allocation(a1, l1, day(1), day(8))
        .await
        .unwrap();
    assert_eq!(info.to, day(8));
    assert_eq!(info.allocated_days, 8);
    assert_eq!(engine.get_allocation(&a1).await.unwrap().to, day(8));
}

#[tokio::test]
async fn reversed_dates_rejected_before_conflict_check() {
    let (engine, [l1, _], [v1, v2]) = fixture("reversed.wal").await;
    engine
        .create_allocation(Ulid::new(), v1, l1, day(1), day(5))
        .await
        .unwrap();

    // Overlaps the existing booking too, but the range itself is invalid.
    let err = engine
        .create_allocation(Ulid::new(), v2, l1, day(5), day(3))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidDateRange));
    assert_eq!(engine.allocation_count(), 1);
}

#[tokio::test]
async fn single_day_booking_counts_one_day() {
    let (engine, [l1, _], [v1, _]) = fixture("single_day.wal").await;
    let info = engine
        .create_allocation(Ulid::new(), v1, l1, day(4), day(4))
        .await
        .unwrap();
    assert_eq!(info.allocated_days, 1);
    assert_eq!(info.number_plate, "V1-PLATE");
    assert_eq!(info.lot_number, "L1");
    assert_eq!(info.lot_location.as_deref(), Some("Ground Floor"));
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn update_into_booked_range_rejected() {
    let (engine, [l1, _], [v1, v2]) = fixture("update_conflict.wal").await;
    let a1 = Ulid::new();
    let a2 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(5))
        .await
        .unwrap();
    engine
        .create_allocation(a2, v2, l1, day(10), day(12))
        .await
        .unwrap();

    let err = engine
        .update_allocation(a1, l1, day(1), day(10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::SlotAlreadyBooked { conflicting, on_update: true } if conflicting == a2
    ));
    assert!(err.to_string().starts_with("cannot extend"));
    assert_eq!(engine.get_allocation(&a1).await.unwrap().to, day(5));
}

#[tokio::test]
async fn update_moves_between_lots() {
    let (engine, [l1, l2], [v1, v2]) = fixture("update_move.wal").await;
    let a1 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(5))
        .await
        .unwrap();

    let info = engine
        .update_allocation(a1, l2, day(2), day(6))
        .await
        .unwrap();
    assert_eq!(info.lot_id, l2);
    assert_eq!(info.lot_number, "L2");

    assert!(engine.allocations_for_lot(&l1).await.is_empty());
    assert_eq!(engine.allocations_for_lot(&l2).await.len(), 1);

    // L1 is free again.
    assert_ok!(
        engine
            .create_allocation(Ulid::new(), v2, l1, day(1), day(5))
            .await
    );
}

#[tokio::test]
async fn update_skips_vehicle_recheck() {
    let (engine, [l1, l2], [v1, _]) = fixture("update_vehicle_overlap.wal").await;
    let a1 = Ulid::new();
    let a2 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(3))
        .await
        .unwrap();
    engine
        .create_allocation(a2, v1, l2, day(10), day(12))
        .await
        .unwrap();

    // Same vehicle ends up on two lots at once; only the target lot is checked.
    assert_ok!(engine.update_allocation(a1, l1, day(1), day(11)).await);
    assert_eq!(engine.allocations_for_vehicle(&v1).await.len(), 2);
}

#[tokio::test]
async fn update_unknown_ids() {
    let (engine, [l1, _], [v1, _]) = fixture("update_unknown.wal").await;
    let missing = Ulid::new();
    assert!(matches!(
        engine.update_allocation(missing, l1, day(1), day(2)).await,
        Err(EngineError::NotFound(id)) if id == missing
    ));

    let a1 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(2))
        .await
        .unwrap();
    let no_lot = Ulid::new();
    assert!(matches!(
        engine.update_allocation(a1, no_lot, day(1), day(2)).await,
        Err(EngineError::NotFound(id)) if id == no_lot
    ));
    assert!(matches!(
        engine.update_allocation(a1, l1, day(4), day(2)).await,
        Err(EngineError::InvalidDateRange)
    ));
}

// ── Delete ───────────────────────────────────────────────

#[tokio::test]
async fn delete_is_idempotent() {
    let (engine, [l1, _], [v1, v2]) = fixture("delete.wal").await;
    let a1 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(5))
        .await
        .unwrap();

    assert!(engine.delete_allocation(a1).await.unwrap());
    assert!(!engine.delete_allocation(a1).await.unwrap());
    assert!(engine.get_allocation(&a1).await.is_none());

    // The slot and the vehicle are both released.
    assert_ok!(
        engine
            .create_allocation(Ulid::new(), v2, l1, day(1), day(5))
            .await
    );
    let l2 = add_lot(&engine, "L3").await;
    assert_ok!(
        engine
            .create_allocation(Ulid::new(), v1, l2, day(1), day(5))
            .await
    );
}

// ── Create validation ────────────────────────────────────

#[tokio::test]
async fn create_requires_known_lot_and_vehicle() {
    let (engine, [l1, _], [v1, _]) = fixture("create_unknown.wal").await;
    let no_lot = Ulid::new();
    let no_vehicle = Ulid::new();
    assert!(matches!(
        engine.create_allocation(Ulid::new(), v1, no_lot, day(1), day(2)).await,
        Err(EngineError::NotFound(id)) if id == no_lot
    ));
    assert!(matches!(
        engine.create_allocation(Ulid::new(), no_vehicle, l1, day(1), day(2)).await,
        Err(EngineError::NotFound(id)) if id == no_vehicle
    ));
}

#[tokio::test]
async fn booking_length_limited() {
    let (engine, [l1, _], [v1, _]) = fixture("booking_limit.wal").await;
    let to = day(1) + chrono::Days::new(MAX_BOOKING_DAYS as u64);
    assert!(matches!(
        engine.create_allocation(Ulid::new(), v1, l1, day(1), to).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn duplicate_ids_rejected() {
    let (engine, [l1, _], [v1, _]) = fixture("duplicates.wal").await;
    assert!(matches!(
        engine.create_lot(l1, "DUP".into(), None).await,
        Err(EngineError::AlreadyExists(id)) if id == l1
    ));

    let mut again = vehicle("OTHER");
    again.id = v1;
    assert!(matches!(
        engine.register_vehicle(again).await,
        Err(EngineError::AlreadyExists(id)) if id == v1
    ));

    let a1 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(1))
        .await
        .unwrap();
    assert!(matches!(
        engine.create_allocation(a1, v1, l1, day(20), day(21)).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn oversized_fields_rejected() {
    let engine = Engine::new(test_wal_path("oversized.wal")).unwrap();
    let long = "X".repeat(MAX_LOT_NUMBER_LEN + 1);
    assert!(matches!(
        engine.create_lot(Ulid::new(), long, None).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine
            .register_vehicle(vehicle(&"P".repeat(MAX_PLATE_LEN + 1)))
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn queries_sorted_by_id() {
    let (engine, [l1, l2], [v1, v2]) = fixture("sorted.wal").await;
    let mut ids = Vec::new();
    for (i, (lot, vehicle)) in [(l1, v1), (l2, v2), (l1, v2)].into_iter().enumerate() {
        let start = day(1 + i as u32 * 10);
        let id = Ulid::new();
        engine
            .create_allocation(id, vehicle, lot, start, start)
            .await
            .unwrap();
        ids.push(id);
    }

    let listed: Vec<Ulid> = engine.list_allocations().await.iter().map(|a| a.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(listed, sorted);

    let on_l1: Vec<Ulid> = engine
        .allocations_for_lot(&l1)
        .await
        .iter()
        .map(|a| a.id)
        .collect();
    let mut expected = vec![ids[0], ids[2]];
    expected.sort();
    assert_eq!(on_l1, expected);

    let for_v2 = engine.allocations_for_vehicle(&v2).await;
    assert_eq!(for_v2.len(), 2);
    assert!(engine.allocations_for_vehicle(&Ulid::new()).await.is_empty());
}

#[tokio::test]
async fn allocations_in_range_returns_overlapping_bookings() {
    let (engine, [l1, l2], [v1, v2]) = fixture("in_range.wal").await;
    let early = Ulid::new();
    let late = Ulid::new();
    engine
        .create_allocation(early, v1, l1, day(1), day(5))
        .await
        .unwrap();
    engine
        .create_allocation(late, v2, l2, day(20), day(25))
        .await
        .unwrap();

    let hits = engine
        .allocations_in_range(Some(day(5)), Some(day(10)))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, early);

    assert!(matches!(
        engine.allocations_in_range(None, Some(day(10))).await,
        Err(EngineError::InvalidDateRange)
    ));
}

#[tokio::test]
async fn search_window_limited() {
    let (engine, _, _) = fixture("window_limit.wal").await;
    let to = day(1) + chrono::Days::new(MAX_QUERY_WINDOW_DAYS as u64);
    assert!(matches!(
        engine.search_available_lots(Some(day(1)), Some(to)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn list_lots_flags_occupied_today() {
    let (engine, [l1, l2], [v1, _]) = fixture("occupied.wal").await;
    engine
        .create_allocation(Ulid::new(), v1, l1, day(10), day(12))
        .await
        .unwrap();

    let on = |lots: &[LotInfo], id: Ulid| lots.iter().find(|l| l.id == id).unwrap().is_occupied;
    let during = engine.list_lots(day(11)).await;
    assert!(on(&during, l1));
    assert!(!on(&during, l2));

    let after = engine.list_lots(day(13)).await;
    assert!(!on(&after, l1));
}

#[tokio::test]
async fn vehicle_lookups() {
    let engine = Engine::new(test_wal_path("vehicle_lookups.wal")).unwrap();
    let owner = Ulid::new();
    let mut first = vehicle("KA01AB1234");
    first.user_id = owner;
    let mut second = vehicle("ka02cd5678");
    second.user_id = owner;
    engine.register_vehicle(first.clone()).await.unwrap();
    engine.register_vehicle(second.clone()).await.unwrap();
    engine.register_vehicle(vehicle("MH12ZZ0001")).await.unwrap();

    assert_eq!(engine.list_vehicles().await.len(), 3);
    assert_eq!(engine.vehicles_for_user(owner).await.len(), 2);
    assert_eq!(engine.get_vehicle(&first.id).await, Some(first.clone()));

    let hits = engine.find_vehicles_by_plate("KA0").await;
    assert_eq!(hits.len(), 2);
    let hits = engine.find_vehicles_by_plate("cd56").await;
    assert_eq!(hits, vec![second]);
    assert!(engine.find_vehicles_by_plate("nope").await.is_empty());
}

// ── Seeding ──────────────────────────────────────────────

#[tokio::test]
async fn seed_lots_creates_layout_once() {
    let engine = Engine::new(test_wal_path("seed.wal")).unwrap();
    assert_eq!(engine.seed_lots().await.unwrap(), 260);
    assert_eq!(engine.seed_lots().await.unwrap(), 0);

    let lots = engine.list_lots(day(1)).await;
    assert_eq!(lots.len(), 260);
    assert_eq!(lots[0].lot_number, "A01");
    assert_eq!(lots[9].lot_number, "A10");
    assert_eq!(lots[259].lot_number, "Z10");
    let location = |n: &str| {
        lots.iter()
            .find(|l| l.lot_number == n)
            .and_then(|l| l.location.clone())
            .unwrap()
    };
    assert_eq!(location("M10"), "Ground Floor");
    assert_eq!(location("N01"), "First Floor");
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let (l1, l2, v1, kept, moved) = {
        let engine = Engine::new(path.clone()).unwrap();
        let l1 = add_lot(&engine, "A01").await;
        let l2 = add_lot(&engine, "A02").await;
        let v1 = add_vehicle(&engine, "KA01").await;
        let kept = Ulid::new();
        let moved = Ulid::new();
        let gone = Ulid::new();
        engine
            .create_allocation(kept, v1, l1, day(1), day(2))
            .await
            .unwrap();
        engine
            .create_allocation(moved, v1, l1, day(10), day(12))
            .await
            .unwrap();
        engine
            .create_allocation(gone, v1, l2, day(20), day(21))
            .await
            .unwrap();
        engine
            .update_allocation(moved, l2, day(10), day(14))
            .await
            .unwrap();
        engine.delete_allocation(gone).await.unwrap();
        (l1, l2, v1, kept, moved)
    };

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.allocation_count(), 2);
    assert_eq!(engine.get_allocation(&kept).await.unwrap().lot_id, l1);
    let moved = engine.get_allocation(&moved).await.unwrap();
    assert_eq!((moved.lot_id, moved.to), (l2, day(14)));
    assert_eq!(engine.allocations_for_vehicle(&v1).await.len(), 2);

    // Replayed schedules still enforce conflicts.
    assert!(matches!(
        engine
            .create_allocation(Ulid::new(), v1, l2, day(13), day(13))
            .await,
        Err(EngineError::SlotAlreadyBooked { .. })
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let engine = Engine::new(path.clone()).unwrap();
    let l1 = add_lot(&engine, "A01").await;
    let v1 = add_vehicle(&engine, "KA01").await;
    for i in 0..10 {
        let id = Ulid::new();
        engine
            .create_allocation(id, v1, l1, day(1 + i), day(1 + i))
            .await
            .unwrap();
        engine.delete_allocation(id).await.unwrap();
    }
    let kept = Ulid::new();
    engine
        .create_allocation(kept, v1, l1, day(5), day(9))
        .await
        .unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 23);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    // Appends after compaction land in the new file.
    let after = Ulid::new();
    engine
        .create_allocation(after, v1, l1, day(20), day(20))
        .await
        .unwrap();
    drop(engine);

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.allocation_count(), 2);
    assert!(engine.get_allocation(&kept).await.is_some());
    assert!(engine.get_allocation(&after).await.is_some());
    assert!(engine.get_vehicle(&v1).await.is_some());
}

#[tokio::test]
async fn writes_after_torn_tail_survive_next_restart() {
    use std::io::Write;

    let path = test_wal_path("torn_then_append.wal");
    let first = {
        let engine = Engine::new(path.clone()).unwrap();
        add_lot(&engine, "A01").await
    };
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[7u8; 6]).unwrap();
    }

    let second = {
        let engine = Engine::new(path.clone()).unwrap();
        assert!(engine.get_lot(&first).await.is_some());
        add_lot(&engine, "A02").await
    };

    let engine = Engine::new(path).unwrap();
    assert!(engine.get_lot(&first).await.is_some());
    assert!(engine.get_lot(&second).await.is_some());
    assert_eq!(engine.list_lots(day(1)).await.len(), 2);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_sharing_an_id_commit_once() {
    let engine = Arc::new(Engine::new(test_wal_path("race_id.wal")).unwrap());
    let id = Ulid::new();

    let n = 8;
    let mut pairs = Vec::new();
    for i in 0..n {
        let lot = add_lot(&engine, &format!("D{i:02}")).await;
        let v = add_vehicle(&engine, &format!("DUP{i:02}")).await;
        pairs.push((lot, v));
    }

    let mut handles = Vec::new();
    for (lot, v) in pairs {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_allocation(id, v, lot, day(1), day(3)).await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, EngineError::AlreadyExists(dup) if dup == id), "{e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.allocation_count(), 1);
    assert_eq!(engine.list_allocations().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_commit_once() {
    let engine = Arc::new(Engine::new(test_wal_path("race_lot.wal")).unwrap());
    let lot = add_lot(&engine, "A01").await;

    let n = 16;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let v = eng
                .register_vehicle(vehicle(&format!("RACE{i:02}")))
                .await
                .unwrap()
                .id;
            eng.create_allocation(Ulid::new(), v, lot, day(1), day(5 + i % 3))
                .await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, EngineError::SlotAlreadyBooked { .. }), "{e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.allocations_for_lot(&lot).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_vehicle_bookings_commit_once() {
    let engine = Arc::new(Engine::new(test_wal_path("race_vehicle.wal")).unwrap());
    let v = add_vehicle(&engine, "KA01").await;
    let mut lots = Vec::new();
    for i in 0..8 {
        lots.push(add_lot(&engine, &format!("B{i:02}")).await);
    }

    let mut handles = Vec::new();
    for lot in lots {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_allocation(Ulid::new(), v, lot, day(3), day(4)).await
        }));
    }

    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.allocations_for_vehicle(&v).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crossing_updates_do_not_deadlock() {
    let (engine, [l1, l2], [v1, v2]) = fixture("crossing_updates.wal").await;
    let engine = Arc::new(engine);
    let a1 = Ulid::new();
    let a2 = Ulid::new();
    engine
        .create_allocation(a1, v1, l1, day(1), day(2))
        .await
        .unwrap();
    engine
        .create_allocation(a2, v2, l2, day(10), day(11))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for round in 0..20u32 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let (id, lot) = if round % 2 == 0 { (a1, l2) } else { (a2, l1) };
            let start = day(1 + round);
            let _ = eng.update_allocation(id, lot, start, start).await;
        }));
    }
    let all = async {
        for h in handles {
            h.await.unwrap();
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(10), all)
        .await
        .expect("updates deadlocked");
    assert_eq!(engine.allocation_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_commit_persists_every_append() {
    let path = test_wal_path("group_commit.wal");
    let engine = Arc::new(Engine::new(path.clone()).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_lot(Ulid::new(), format!("G{i:02}"), None).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.list_lots(day(1)).await.len(), n);

    let engine2 = Engine::new(path).unwrap();
    assert_eq!(engine2.list_lots(day(1)).await.len(), n);
}
