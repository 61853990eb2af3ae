use crate::cluster::PeerClient;
use crate::error::{Result, TessioError};
use crate::store::{
    ActivityStore, FingerprintEntry, InventoryStore, ServerRecord, ServerStatus, ServerStore,
    SnapshotStore,
};
use crate::transfer::{TransferEngine, CHUNK_SIZE};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Brings a returning worker back into the fleet. If its former partner
/// is still free the pair is restored and the grant-time fingerprints
/// decide what travels: rows the stand-in never touched are reactivated
/// where the returning node already holds them, while the rest go
/// through the full transfer path. With no viable partner the node
/// rejoins standalone.
pub struct InitiateRecoveryOperation {
    servers: Arc<ServerStore>,
    inventory: Arc<InventoryStore>,
    snapshots: Arc<SnapshotStore>,
    peers: Arc<PeerClient>,
    engine: Arc<TransferEngine>,
    activity: Arc<ActivityStore>,
}

pub struct InitiateRecoveryOperationRequest {
    pub server_id: i64,
    pub relinquished_ids: Vec<i64>,
}

pub enum RecoveryOutcome {
    Repaired { restored: usize },
    Standalone { restored: usize },
}

impl InitiateRecoveryOperation {
    pub fn new(
        servers: Arc<ServerStore>,
        inventory: Arc<InventoryStore>,
        snapshots: Arc<SnapshotStore>,
        peers: Arc<PeerClient>,
        engine: Arc<TransferEngine>,
        activity: Arc<ActivityStore>,
    ) -> Self {
        Self {
            servers,
            inventory,
            snapshots,
            peers,
            engine,
            activity,
        }
    }

    pub async fn run(&self, request: InitiateRecoveryOperationRequest) -> Result<RecoveryOutcome> {
        let caller = self.servers.require(request.server_id)?;
        let snapshot = self.snapshots.load(caller.id)?;

        let former_id = snapshot
            .as_ref()
            .map(|taken| taken.backup_server_id)
            .or(caller.partner_id);
        let former = match former_id {
            Some(id) => match self.servers.get(id)? {
                Some(record)
                    if record.status != ServerStatus::Disabled
                        && (record.partner_id.is_none()
                            || record.partner_id == Some(caller.id)) =>
                {
                    Some(record)
                }
                _ => None,
            },
            None => None,
        };

        match former {
            Some(former) => {
                let entries = snapshot.map(|taken| taken.entries).unwrap_or_default();
                self.repair(&caller, &former, entries, &request.relinquished_ids)
                    .await
            }
            None => self.standalone(&caller, &request.relinquished_ids).await,
        }
    }

    async fn repair(
        &self,
        caller: &ServerRecord,
        former: &ServerRecord,
        saved: Vec<FingerprintEntry>,
        relinquished: &[i64],
    ) -> Result<RecoveryOutcome> {
        let caller_address = format!("{}:{}", caller.hostname, caller.port);
        let former_address = format!("{}:{}", former.hostname, former.port);

        self.link(&caller_address, caller.id, &former_address, former.id)
            .await?;
        self.servers.pair(caller.id, former.id)?;
        self.broadcast_map().await?;

        let mut restored = 0;
        if !saved.is_empty() {
            let ids: Vec<i64> = saved.iter().map(|entry| entry.id).collect();

            let mut current = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(CHUNK_SIZE) {
                let fetched = self
                    .peers
                    .fetch_fingerprints(&former_address, chunk)
                    .await
                    .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;
                current.extend(fetched);
            }

            let (unchanged, changed) = partition_by_fingerprint(&saved, &current);

            if !unchanged.is_empty() {
                restored += self
                    .reactivate_in_place(&unchanged, &caller_address, caller.id, &former_address)
                    .await?;
            }
            if !changed.is_empty() {
                for chunk in changed.chunks(CHUNK_SIZE) {
                    let response = self
                        .peers
                        .deactivate(&former_address, chunk, 0, true)
                        .await
                        .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;
                    if let Some(rows) = response.rows {
                        self.inventory.upsert(&rows)?;
                    }
                }
                restored += self.try_restore(&changed, caller.id).await;
            }
        }

        self.snapshots.clear_for(caller.id)?;

        // Relinquished rows already covered by the snapshot travelled above.
        let handled: HashSet<i64> = saved.iter().map(|entry| entry.id).collect();
        let leftover: Vec<i64> = relinquished
            .iter()
            .copied()
            .filter(|id| !handled.contains(id))
            .collect();
        restored += self.try_restore(&leftover, caller.id).await;

        self.activity.note(
            0,
            "recovery",
            &format!(
                "server {} re-paired with server {}, restored {} items",
                caller.id, former.id, restored
            ),
        );

        Ok(RecoveryOutcome::Repaired { restored })
    }

    /// Flips ownership back without shipping any data: the returning node
    /// still holds identical rows on disk, so the stand-in only restamps
    /// its copies and both sides reactivate.
    async fn reactivate_in_place(
        &self,
        ids: &[i64],
        caller_address: &str,
        caller_id: i64,
        former_address: &str,
    ) -> Result<usize> {
        for chunk in ids.chunks(CHUNK_SIZE) {
            self.peers
                .deactivate(former_address, chunk, caller_id, false)
                .await
                .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;
            self.peers
                .activate(former_address, chunk)
                .await
                .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;
            self.peers
                .activate(caller_address, chunk)
                .await
                .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;
        }

        self.inventory.set_location(ids, caller_id, true, 0)?;
        Ok(ids.len())
    }

    async fn standalone(
        &self,
        caller: &ServerRecord,
        relinquished: &[i64],
    ) -> Result<RecoveryOutcome> {
        let caller_address = format!("{}:{}", caller.hostname, caller.port);

        self.servers.set_partner(caller.id, None)?;
        self.servers.set_status(caller.id, ServerStatus::Standalone)?;
        self.peers
            .set_partner(&caller_address, None)
            .await
            .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;
        self.snapshots.clear_for(caller.id)?;
        self.broadcast_map().await?;

        let restored = self.try_restore(relinquished, caller.id).await;

        self.activity.note(
            0,
            "recovery",
            &format!(
                "server {} rejoined standalone, restored {} items",
                caller.id, restored
            ),
        );

        Ok(RecoveryOutcome::Standalone { restored })
    }

    async fn link(
        &self,
        caller_address: &str,
        caller_id: i64,
        former_address: &str,
        former_id: i64,
    ) -> Result<()> {
        self.peers
            .set_partner(caller_address, Some(former_id))
            .await
            .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;

        if let Err(error) = self.peers.set_partner(former_address, Some(caller_id)).await {
            if let Err(rollback_error) = self.peers.set_partner(caller_address, None).await {
                tracing::warn!(
                    "Pairing rollback failed: server={} error={}",
                    caller_id,
                    rollback_error
                );
            }
            return Err(TessioError::PeerUnreachable(error.to_string()));
        }

        Ok(())
    }

    async fn broadcast_map(&self) -> Result<()> {
        let fleet = self.servers.list()?;
        for target in &fleet {
            let address = format!("{}:{}", target.hostname, target.port);
            if let Err(error) = self.peers.push_servers(&address, &fleet).await {
                tracing::warn!(
                    "Failed to push server map: target={} error={}",
                    target.id,
                    error
                );
            }
        }
        Ok(())
    }

    async fn try_restore(&self, ids: &[i64], destination: i64) -> usize {
        if ids.is_empty() {
            return 0;
        }
        match self.engine.execute(ids, destination).await {
            Ok(moved) => moved,
            Err(error) => {
                tracing::warn!(
                    "Item restoration incomplete: destination={} error={}",
                    destination,
                    error
                );
                0
            }
        }
    }
}

/// Splits the grant-time ids into those whose current fingerprint still
/// matches and those the stand-in touched. Ids missing from the current
/// set count as touched.
fn partition_by_fingerprint(
    saved: &[FingerprintEntry],
    current: &[FingerprintEntry],
) -> (Vec<i64>, Vec<i64>) {
    let index: HashMap<i64, &Option<String>> = current
        .iter()
        .map(|entry| (entry.id, &entry.fingerprint))
        .collect();

    let mut unchanged = Vec::new();
    let mut changed = Vec::new();
    for entry in saved {
        match index.get(&entry.id) {
            Some(print) if **print == entry.fingerprint => unchanged.push(entry.id),
            _ => changed.push(entry.id),
        }
    }
    (unchanged, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::{ActivateResponse, DeactivateResponse};
    use crate::store::{InventoryItem, ReservationStore, StoreHandle};
    use crate::tasks::TaskQueue;
    use axum::extract::Query;
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeWorker {
        fingerprint_prefix: Mutex<String>,
        fingerprint_overrides: Mutex<HashMap<i64, String>>,
        deactivate_calls: Mutex<Vec<(Vec<i64>, i64, bool)>>,
        activations: Mutex<Vec<Vec<i64>>>,
        updates: Mutex<Vec<Vec<InventoryItem>>>,
        partner_calls: Mutex<Vec<Option<i64>>>,
    }

    async fn spawn_fake_worker(state: Arc<FakeWorker>) -> String {
        let deactivate_state = state.clone();
        let activate_state = state.clone();
        let update_state = state.clone();
        let partner_state = state.clone();
        let fingerprint_state = state;

        let app = Router::new()
            .route(
                "/inventory/deactivate",
                put(move |Query(params): Query<HashMap<String, String>>| {
                    let state = deactivate_state.clone();
                    async move {
                        let ids: Vec<i64> = params["ids"]
                            .split(',')
                            .map(|value| value.parse().unwrap())
                            .collect();
                        let new_location: i64 = params["new_location"].parse().unwrap();
                        let send_data = params["send_data"] == "true";
                        state
                            .deactivate_calls
                            .lock()
                            .unwrap()
                            .push((ids.clone(), new_location, send_data));

                        let rows = send_data.then(|| {
                            ids.iter()
                                .map(|&id| InventoryItem {
                                    id,
                                    committed: true,
                                    name: format!("ticket-{}", id),
                                    location: new_location,
                                    activated: false,
                                    locked: false,
                                    on_backup: false,
                                    available: true,
                                    reserved_by: None,
                                    last_modified_by: 0,
                                    last_modified_at: Utc::now(),
                                })
                                .collect::<Vec<_>>()
                        });
                        Json(DeactivateResponse {
                            deactivated: ids,
                            clean: vec![],
                            rows,
                        })
                    }
                }),
            )
            .route(
                "/inventory/activate",
                put(move |Json(ids): Json<Vec<i64>>| {
                    let state = activate_state.clone();
                    async move {
                        state.activations.lock().unwrap().push(ids.clone());
                        Json(ActivateResponse { activated: ids })
                    }
                }),
            )
            .route(
                "/inventory/update",
                put(move |Json(rows): Json<Vec<InventoryItem>>| {
                    let state = update_state.clone();
                    async move {
                        state.updates.lock().unwrap().push(rows);
                        Json(serde_json::json!({"updated": 0}))
                    }
                }),
            )
            .route(
                "/inventory/fingerprints",
                post(move |Json(ids): Json<Vec<i64>>| {
                    let state = fingerprint_state.clone();
                    async move {
                        let prefix = state.fingerprint_prefix.lock().unwrap().clone();
                        let overrides = state.fingerprint_overrides.lock().unwrap().clone();
                        let entries: Vec<FingerprintEntry> = ids
                            .into_iter()
                            .map(|id| FingerprintEntry {
                                id,
                                fingerprint: Some(format!(
                                    "{}-{}",
                                    overrides.get(&id).unwrap_or(&prefix),
                                    id
                                )),
                            })
                            .collect();
                        Json(entries)
                    }
                }),
            )
            .route(
                "/partner",
                put(move |Query(params): Query<HashMap<String, String>>| {
                    let state = partner_state.clone();
                    async move {
                        let partner_id =
                            params.get("partner_id").map(|value| value.parse().unwrap());
                        state.partner_calls.lock().unwrap().push(partner_id);
                        Json(serde_json::json!({"ok": true}))
                    }
                }),
            )
            .route(
                "/servers/sync",
                put(|Json(_records): Json<Vec<ServerRecord>>| async move {
                    Json(serde_json::json!({"ok": true}))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        address
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        servers: Arc<ServerStore>,
        inventory: Arc<InventoryStore>,
        snapshots: Arc<SnapshotStore>,
        operation: InitiateRecoveryOperation,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let handle = StoreHandle::open(dir.path()).unwrap();
        let servers = Arc::new(ServerStore::new(handle.clone()).unwrap());
        let inventory = Arc::new(InventoryStore::new(handle.clone()).unwrap());
        let snapshots = Arc::new(SnapshotStore::new(handle.clone()).unwrap());
        let reservations = Arc::new(ReservationStore::new(handle.clone()).unwrap());
        let activity = Arc::new(ActivityStore::new(handle).unwrap());
        let peers = Arc::new(PeerClient::new().unwrap());
        let engine = Arc::new(
            TransferEngine::new(
                inventory.clone(),
                servers.clone(),
                reservations,
                activity.clone(),
                peers.clone(),
                Arc::new(TaskQueue::new(4)),
            )
            .with_resolution_window(Duration::from_millis(50)),
        );

        let operation = InitiateRecoveryOperation::new(
            servers.clone(),
            inventory.clone(),
            snapshots.clone(),
            peers,
            engine,
            activity,
        );

        Fixture {
            _dir: dir,
            servers,
            inventory,
            snapshots,
            operation,
        }
    }

    fn record(id: i64, address: &str, status: ServerStatus, partner_id: Option<i64>) -> ServerRecord {
        let (hostname, port) = address.rsplit_once(':').unwrap();
        ServerRecord {
            id,
            hostname: hostname.to_string(),
            port: port.parse().unwrap(),
            status,
            partner_id,
        }
    }

    fn seed_items(inventory: &InventoryStore, ids: &[i64], location: i64) {
        let items: Vec<InventoryItem> = ids
            .iter()
            .map(|&id| InventoryItem {
                id,
                committed: true,
                name: format!("ticket-{}", id),
                location,
                activated: true,
                locked: false,
                on_backup: true,
                available: true,
                reserved_by: None,
                last_modified_by: 0,
                last_modified_at: Utc::now(),
            })
            .collect();
        inventory.upsert(&items).unwrap();
    }

    fn snapshot_entries(prefix: &str, ids: &[i64]) -> Vec<FingerprintEntry> {
        ids.iter()
            .map(|&id| FingerprintEntry {
                id,
                fingerprint: Some(format!("{}-{}", prefix, id)),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unchanged_data_reactivates_without_shipping_rows() {
        let fixture = fixture();
        let returning = Arc::new(FakeWorker::default());
        let stand_in = Arc::new(FakeWorker::default());
        *stand_in.fingerprint_prefix.lock().unwrap() = "print".to_string();
        let returning_address = spawn_fake_worker(returning.clone()).await;
        let stand_in_address = spawn_fake_worker(stand_in.clone()).await;

        fixture
            .servers
            .replace_all(&[
                record(1, &returning_address, ServerStatus::Disabled, Some(2)),
                record(2, &stand_in_address, ServerStatus::Standalone, None),
            ])
            .unwrap();
        fixture
            .snapshots
            .save(1, 2, &snapshot_entries("print", &[10, 11]))
            .unwrap();
        seed_items(&fixture.inventory, &[10, 11], 2);

        let outcome = fixture
            .operation
            .run(InitiateRecoveryOperationRequest {
                server_id: 1,
                relinquished_ids: vec![],
            })
            .await
            .unwrap();

        match outcome {
            RecoveryOutcome::Repaired { restored } => assert_eq!(restored, 2),
            RecoveryOutcome::Standalone { .. } => panic!("expected a repair"),
        }

        assert_eq!(*returning.partner_calls.lock().unwrap(), vec![Some(2)]);
        assert_eq!(*stand_in.partner_calls.lock().unwrap(), vec![Some(1)]);
        assert_eq!(fixture.servers.require(1).unwrap().partner_id, Some(2));
        assert_eq!(fixture.servers.require(1).unwrap().status, ServerStatus::Active);
        assert_eq!(fixture.servers.require(2).unwrap().partner_id, Some(1));

        let calls = stand_in.deactivate_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (vec![10, 11], 1, false));
        assert!(returning.updates.lock().unwrap().is_empty());
        assert_eq!(*stand_in.activations.lock().unwrap(), vec![vec![10, 11]]);
        assert_eq!(*returning.activations.lock().unwrap(), vec![vec![10, 11]]);

        let row = fixture.inventory.get_committed(10).unwrap().unwrap();
        assert_eq!(row.location, 1);
        assert!(row.activated);
        assert!(fixture.snapshots.load(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_changed_data_ships_rows_back() {
        let fixture = fixture();
        let returning = Arc::new(FakeWorker::default());
        let stand_in = Arc::new(FakeWorker::default());
        *stand_in.fingerprint_prefix.lock().unwrap() = "changed".to_string();
        let returning_address = spawn_fake_worker(returning.clone()).await;
        let stand_in_address = spawn_fake_worker(stand_in.clone()).await;

        fixture
            .servers
            .replace_all(&[
                record(1, &returning_address, ServerStatus::Disabled, Some(2)),
                record(2, &stand_in_address, ServerStatus::Standalone, None),
            ])
            .unwrap();
        fixture
            .snapshots
            .save(1, 2, &snapshot_entries("print", &[10, 11]))
            .unwrap();
        seed_items(&fixture.inventory, &[10, 11], 2);

        let outcome = fixture
            .operation
            .run(InitiateRecoveryOperationRequest {
                server_id: 1,
                relinquished_ids: vec![],
            })
            .await
            .unwrap();

        match outcome {
            RecoveryOutcome::Repaired { restored } => assert_eq!(restored, 2),
            RecoveryOutcome::Standalone { .. } => panic!("expected a repair"),
        }

        let calls = stand_in.deactivate_calls.lock().unwrap();
        assert_eq!(calls[0], (vec![10, 11], 0, true));

        let delivered: Vec<i64> = returning
            .updates
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|row| !row.on_backup)
            .map(|row| row.id)
            .collect();
        assert_eq!(delivered, vec![10, 11]);

        let copies: Vec<i64> = stand_in
            .updates
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|row| row.on_backup)
            .map(|row| row.id)
            .collect();
        assert_eq!(copies, vec![10, 11]);

        let row = fixture.inventory.get_committed(10).unwrap().unwrap();
        assert_eq!(row.location, 1);
        assert!(row.activated);
    }

    #[tokio::test]
    async fn test_mixed_set_splits_between_fast_path_and_transfer() {
        let fixture = fixture();
        let returning = Arc::new(FakeWorker::default());
        let stand_in = Arc::new(FakeWorker::default());
        *stand_in.fingerprint_prefix.lock().unwrap() = "print".to_string();
        stand_in
            .fingerprint_overrides
            .lock()
            .unwrap()
            .insert(11, "sold".to_string());
        let returning_address = spawn_fake_worker(returning.clone()).await;
        let stand_in_address = spawn_fake_worker(stand_in.clone()).await;

        fixture
            .servers
            .replace_all(&[
                record(1, &returning_address, ServerStatus::Disabled, Some(2)),
                record(2, &stand_in_address, ServerStatus::Standalone, None),
            ])
            .unwrap();
        fixture
            .snapshots
            .save(1, 2, &snapshot_entries("print", &[10, 11]))
            .unwrap();
        seed_items(&fixture.inventory, &[10, 11], 2);

        let outcome = fixture
            .operation
            .run(InitiateRecoveryOperationRequest {
                server_id: 1,
                relinquished_ids: vec![],
            })
            .await
            .unwrap();

        match outcome {
            RecoveryOutcome::Repaired { restored } => assert_eq!(restored, 2),
            RecoveryOutcome::Standalone { .. } => panic!("expected a repair"),
        }

        // The untouched row is restamped where it sits, only the sold one travels.
        let calls = stand_in.deactivate_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (vec![10], 1, false));
        assert_eq!(calls[1], (vec![11], 0, true));

        let delivered: Vec<i64> = returning
            .updates
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|row| !row.on_backup)
            .map(|row| row.id)
            .collect();
        assert_eq!(delivered, vec![11]);

        assert_eq!(
            *stand_in.activations.lock().unwrap(),
            vec![vec![10], vec![11]]
        );
        assert_eq!(
            *returning.activations.lock().unwrap(),
            vec![vec![10], vec![11]]
        );

        for id in [10, 11] {
            let row = fixture.inventory.get_committed(id).unwrap().unwrap();
            assert_eq!(row.location, 1);
            assert!(row.activated);
        }
        assert!(fixture.snapshots.load(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repaired_partner_taken_means_standalone() {
        let fixture = fixture();
        let returning = Arc::new(FakeWorker::default());
        let stand_in = Arc::new(FakeWorker::default());
        let third = Arc::new(FakeWorker::default());
        let returning_address = spawn_fake_worker(returning.clone()).await;
        let stand_in_address = spawn_fake_worker(stand_in.clone()).await;
        let third_address = spawn_fake_worker(third.clone()).await;

        fixture
            .servers
            .replace_all(&[
                record(1, &returning_address, ServerStatus::Disabled, Some(2)),
                record(2, &stand_in_address, ServerStatus::Active, Some(3)),
                record(3, &third_address, ServerStatus::Active, Some(2)),
            ])
            .unwrap();
        seed_items(&fixture.inventory, &[7], 2);

        let outcome = fixture
            .operation
            .run(InitiateRecoveryOperationRequest {
                server_id: 1,
                relinquished_ids: vec![7],
            })
            .await
            .unwrap();

        match outcome {
            RecoveryOutcome::Standalone { restored } => assert_eq!(restored, 1),
            RecoveryOutcome::Repaired { .. } => panic!("expected standalone"),
        }

        assert_eq!(*returning.partner_calls.lock().unwrap(), vec![None]);
        let caller = fixture.servers.require(1).unwrap();
        assert_eq!(caller.status, ServerStatus::Standalone);
        assert!(caller.partner_id.is_none());

        let delivered: Vec<i64> = returning
            .updates
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|row| row.id)
            .collect();
        assert_eq!(delivered, vec![7]);
        assert_eq!(fixture.inventory.get_committed(7).unwrap().unwrap().location, 1);
    }

    #[test]
    fn test_fingerprint_partition_ignores_order() {
        let saved = snapshot_entries("print", &[1, 2]);
        let shuffled = snapshot_entries("print", &[2, 1]);
        assert_eq!(
            partition_by_fingerprint(&saved, &shuffled),
            (vec![1, 2], vec![])
        );

        let mut touched = snapshot_entries("print", &[2, 1]);
        touched[1].fingerprint = Some("other".to_string());
        assert_eq!(
            partition_by_fingerprint(&saved, &touched),
            (vec![2], vec![1])
        );

        assert_eq!(
            partition_by_fingerprint(&saved, &snapshot_entries("print", &[1])),
            (vec![1], vec![2])
        );
    }
}
