use crate::cluster::PeerClient;
use crate::error::{Result, TessioError};
use crate::store::{ActivityStore, InventoryItem, InventoryStore, ReservationStore, ServerStore};
use crate::tasks::TaskQueue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Items move between nodes in fixed slices of this many ids.
pub const CHUNK_SIZE: usize = 1000;

/// How long a pool claim rests before the hand-off proceeds, giving a
/// competing transfer time to surface.
const RESOLUTION_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferGroup {
    pub source: i64,
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferPlan {
    pub groups: Vec<TransferGroup>,
    pub already_at_destination: Vec<i64>,
    pub unknown: Vec<i64>,
}

/// Moves inventory between the pool and workers. Each move follows the
/// same handshake: take rows out of service at the source, hand the row
/// images to the destination and its partner, then bring them back into
/// service. A failed hand-off parks the rows at the pool instead of
/// losing them.
pub struct TransferEngine {
    inventory: Arc<InventoryStore>,
    servers: Arc<ServerStore>,
    reservations: Arc<ReservationStore>,
    activity: Arc<ActivityStore>,
    peers: Arc<PeerClient>,
    tasks: Arc<TaskQueue>,
    resolution_window: Duration,
}

impl TransferEngine {
    pub fn new(
        inventory: Arc<InventoryStore>,
        servers: Arc<ServerStore>,
        reservations: Arc<ReservationStore>,
        activity: Arc<ActivityStore>,
        peers: Arc<PeerClient>,
        tasks: Arc<TaskQueue>,
    ) -> Self {
        Self {
            inventory,
            servers,
            reservations,
            activity,
            peers,
            tasks,
            resolution_window: RESOLUTION_WINDOW,
        }
    }

    pub fn with_resolution_window(mut self, window: Duration) -> Self {
        self.resolution_window = window;
        self
    }

    /// Buckets the requested ids by current owner. Duplicates collapse,
    /// ids already at the destination and ids nobody knows are set aside
    /// so a repeated transfer request converges instead of erroring.
    pub fn plan(&self, ids: &[i64], destination: i64) -> Result<TransferPlan> {
        let mut seen = HashSet::new();
        let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        let mut already_at_destination = Vec::new();
        let mut unknown = Vec::new();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            match self.inventory.get_committed(id)? {
                None => unknown.push(id),
                Some(item) if item.location == destination => already_at_destination.push(id),
                Some(item) => groups.entry(item.location).or_default().push(id),
            }
        }

        Ok(TransferPlan {
            groups: groups
                .into_iter()
                .map(|(source, ids)| TransferGroup { source, ids })
                .collect(),
            already_at_destination,
            unknown,
        })
    }

    /// Queues one background task per source group and returns immediately.
    pub fn dispatch(self: &Arc<Self>, plan: &TransferPlan, destination: i64) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(plan.groups.len());
        for group in &plan.groups {
            let engine = Arc::clone(self);
            let group = group.clone();
            handles.push(self.tasks.dispatch("transfer", async move {
                engine.move_group(group.source, &group.ids, destination).await?;
                Ok(())
            }));
        }
        handles
    }

    /// Plans and runs a transfer to completion, returning how many items
    /// arrived at the destination.
    pub async fn execute(&self, ids: &[i64], destination: i64) -> Result<usize> {
        let plan = self.plan(ids, destination)?;
        let mut moved = 0;
        for group in &plan.groups {
            moved += self.move_group(group.source, &group.ids, destination).await?;
        }
        Ok(moved)
    }

    async fn move_group(&self, source: i64, ids: &[i64], destination: i64) -> Result<usize> {
        let mut moved = 0;
        for chunk in ids.chunks(CHUNK_SIZE) {
            moved += if source == 0 {
                self.move_pool_chunk(chunk, destination).await?
            } else {
                self.move_worker_chunk(source, chunk, destination).await?
            };
        }

        self.activity.note(
            0,
            "transfer",
            &format!(
                "moved {} of {} items from {} to {}",
                moved,
                ids.len(),
                source,
                destination
            ),
        );
        Ok(moved)
    }

    async fn move_worker_chunk(
        &self,
        source: i64,
        chunk: &[i64],
        destination: i64,
    ) -> Result<usize> {
        let source_address = self.servers.address(source)?;
        let response = self
            .peers
            .deactivate(&source_address, chunk, destination, true)
            .await
            .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;

        if !response.clean.is_empty() {
            tracing::warn!(
                "Source skipped rows it does not own or has locked: source={} count={}",
                source,
                response.clean.len()
            );
        }

        let deactivated = response.deactivated;
        if deactivated.is_empty() {
            return Ok(0);
        }
        let rows = response.rows.unwrap_or_default();

        if destination == 0 {
            self.inventory.upsert(&rows)?;
            return Ok(deactivated.len());
        }

        match self.deliver(&rows, &deactivated, destination).await {
            Ok(count) => {
                self.inventory.set_location(&deactivated, destination, true, 0)?;
                Ok(count)
            }
            Err(error) => {
                tracing::warn!(
                    "Delivery failed, parking rows at the pool: destination={} error={}",
                    destination,
                    error
                );
                let mut parked = rows;
                for row in &mut parked {
                    row.location = 0;
                    row.activated = false;
                    row.on_backup = false;
                }
                self.inventory.upsert(&parked)?;
                self.move_pool_chunk(&deactivated, destination).await
            }
        }
    }

    async fn move_pool_chunk(&self, chunk: &[i64], destination: i64) -> Result<usize> {
        let mut claimed = Vec::new();
        for &id in chunk {
            if self.reservations.claim(id, destination)? {
                claimed.push(id);
            } else {
                tracing::warn!(
                    "Pool item already claimed by another transfer: id={} destination={}",
                    id,
                    destination
                );
            }
        }

        if claimed.is_empty() {
            return Ok(0);
        }

        tokio::time::sleep(self.resolution_window).await;

        let mut confirmed = Vec::new();
        for &id in &claimed {
            if self.reservations.claimed_by(id)? == Some(destination) {
                confirmed.push(id);
            }
        }

        let mut rows = self.inventory.rows_for(&confirmed)?;
        for row in &mut rows {
            row.location = destination;
            row.activated = false;
            row.on_backup = false;
        }
        let moved_ids: Vec<i64> = rows.iter().map(|row| row.id).collect();

        let outcome = self.deliver(&rows, &moved_ids, destination).await;
        self.reservations.release(&claimed)?;
        let count = outcome?;

        self.inventory.set_location(&moved_ids, destination, true, 0)?;
        Ok(count)
    }

    /// Hands row images to the destination and its partner, then activates
    /// both sides. Replica delivery is not optional: if the partner cannot
    /// take its copies the whole hand-off fails.
    async fn deliver(
        &self,
        rows: &[InventoryItem],
        ids: &[i64],
        destination: i64,
    ) -> Result<usize> {
        let record = self.servers.require(destination)?;
        let destination_address = format!("{}:{}", record.hostname, record.port);

        let partner_address = match record.partner_id {
            Some(partner_id) => match self.servers.get(partner_id)? {
                Some(partner) => Some(format!("{}:{}", partner.hostname, partner.port)),
                None => {
                    tracing::warn!(
                        "Partner missing from server map, skipping replicas: partner={}",
                        partner_id
                    );
                    None
                }
            },
            None => None,
        };

        if let Some(address) = &partner_address {
            let mut replicas = rows.to_vec();
            for replica in &mut replicas {
                replica.on_backup = true;
            }
            self.peers.push_rows(address, &replicas).await?;
        }

        self.peers.push_rows(&destination_address, rows).await?;

        if let Some(address) = &partner_address {
            self.peers.activate(address, ids).await?;
        }

        let activated = self.peers.activate(&destination_address, ids).await?;
        if activated.len() != ids.len() {
            tracing::warn!(
                "Destination activated {} of {} rows: destination={}",
                activated.len(),
                ids.len(),
                destination
            );
        }

        Ok(activated.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::{ActivateResponse, DeactivateResponse};
    use crate::store::{ServerRecord, ServerStatus, StoreHandle};
    use axum::extract::Query;
    use axum::routing::put;
    use axum::{Json, Router};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Fixture {
        _dir: tempfile::TempDir,
        inventory: Arc<InventoryStore>,
        servers: Arc<ServerStore>,
        reservations: Arc<ReservationStore>,
        engine: Arc<TransferEngine>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let handle = StoreHandle::open(dir.path()).unwrap();
        let inventory = Arc::new(InventoryStore::new(handle.clone()).unwrap());
        let servers = Arc::new(ServerStore::new(handle.clone()).unwrap());
        let reservations = Arc::new(ReservationStore::new(handle.clone()).unwrap());
        let activity = Arc::new(ActivityStore::new(handle).unwrap());

        let engine = Arc::new(
            TransferEngine::new(
                inventory.clone(),
                servers.clone(),
                reservations.clone(),
                activity,
                Arc::new(PeerClient::new().unwrap()),
                Arc::new(TaskQueue::new(4)),
            )
            .with_resolution_window(Duration::from_millis(50)),
        );

        Fixture {
            _dir: dir,
            inventory,
            servers,
            reservations,
            engine,
        }
    }

    fn seed_items(inventory: &InventoryStore, ids: &[i64], location: i64, activated: bool) {
        let items: Vec<InventoryItem> = ids
            .iter()
            .map(|&id| InventoryItem {
                id,
                committed: true,
                name: format!("ticket-{}", id),
                location,
                activated,
                locked: false,
                on_backup: false,
                available: true,
                reserved_by: None,
                last_modified_by: 0,
                last_modified_at: Utc::now(),
            })
            .collect();
        inventory.upsert(&items).unwrap();
    }

    fn server_record(id: i64, address: &str) -> ServerRecord {
        let (hostname, port) = address.rsplit_once(':').unwrap();
        ServerRecord {
            id,
            hostname: hostname.to_string(),
            port: port.parse().unwrap(),
            status: ServerStatus::Active,
            partner_id: None,
        }
    }

    #[derive(Default)]
    struct FakeWorker {
        deactivate_calls: Mutex<Vec<Vec<i64>>>,
        updates: Mutex<Vec<Vec<InventoryItem>>>,
        activations: Mutex<Vec<Vec<i64>>>,
    }

    async fn spawn_fake_worker(state: Arc<FakeWorker>) -> String {
        let deactivate_state = state.clone();
        let update_state = state.clone();
        let activate_state = state;

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
                        state.deactivate_calls.lock().unwrap().push(ids.clone());

                        let rows = (params["send_data"] == "true").then(|| {
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
                "/inventory/activate",
                put(move |Json(ids): Json<Vec<i64>>| {
                    let state = activate_state.clone();
                    async move {
                        state.activations.lock().unwrap().push(ids.clone());
                        Json(ActivateResponse { activated: ids })
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        address
    }

    #[test]
    fn test_plan_buckets_ids_by_owner() {
        let fixture = fixture();
        seed_items(&fixture.inventory, &[1, 2], 5, true);
        seed_items(&fixture.inventory, &[3], 9, true);
        seed_items(&fixture.inventory, &[4], 7, true);

        let plan = fixture.engine.plan(&[1, 2, 2, 3, 4, 99], 7).unwrap();

        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].source, 5);
        assert_eq!(plan.groups[0].ids, vec![1, 2]);
        assert_eq!(plan.groups[1].source, 9);
        assert_eq!(plan.groups[1].ids, vec![3]);
        assert_eq!(plan.already_at_destination, vec![4]);
        assert_eq!(plan.unknown, vec![99]);
    }

    #[tokio::test]
    async fn test_move_between_workers() {
        let fixture = fixture();
        let source = Arc::new(FakeWorker::default());
        let destination = Arc::new(FakeWorker::default());
        let source_address = spawn_fake_worker(source.clone()).await;
        let destination_address = spawn_fake_worker(destination.clone()).await;

        fixture
            .servers
            .replace_all(&[
                server_record(5, &source_address),
                server_record(7, &destination_address),
            ])
            .unwrap();
        seed_items(&fixture.inventory, &[1, 2], 5, true);

        let moved = fixture.engine.execute(&[1, 2], 7).await.unwrap();
        assert_eq!(moved, 2);

        assert_eq!(*source.deactivate_calls.lock().unwrap(), vec![vec![1, 2]]);
        let delivered = destination.updates.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].iter().all(|row| row.location == 7 && !row.activated));
        assert_eq!(*destination.activations.lock().unwrap(), vec![vec![1, 2]]);

        let row = fixture.inventory.get_committed(1).unwrap().unwrap();
        assert_eq!(row.location, 7);
        assert!(row.activated);
    }

    #[tokio::test]
    async fn test_replicas_reach_the_destinations_partner() {
        let fixture = fixture();
        let source = Arc::new(FakeWorker::default());
        let destination = Arc::new(FakeWorker::default());
        let partner = Arc::new(FakeWorker::default());
        let source_address = spawn_fake_worker(source.clone()).await;
        let destination_address = spawn_fake_worker(destination.clone()).await;
        let partner_address = spawn_fake_worker(partner.clone()).await;

        let mut destination_record = server_record(7, &destination_address);
        destination_record.partner_id = Some(8);
        let mut partner_record = server_record(8, &partner_address);
        partner_record.partner_id = Some(7);
        fixture
            .servers
            .replace_all(&[
                server_record(5, &source_address),
                destination_record,
                partner_record,
            ])
            .unwrap();
        seed_items(&fixture.inventory, &[1], 5, true);

        let moved = fixture.engine.execute(&[1], 7).await.unwrap();
        assert_eq!(moved, 1);

        let copies = partner.updates.lock().unwrap();
        assert_eq!(copies.len(), 1);
        assert!(copies[0][0].on_backup);
        assert_eq!(copies[0][0].location, 7);
        assert_eq!(*partner.activations.lock().unwrap(), vec![vec![1]]);

        let primary = destination.updates.lock().unwrap();
        assert!(!primary[0][0].on_backup);
    }

    #[tokio::test]
    async fn test_large_transfers_move_in_fixed_chunks() {
        let fixture = fixture();
        let source = Arc::new(FakeWorker::default());
        let destination = Arc::new(FakeWorker::default());
        let source_address = spawn_fake_worker(source.clone()).await;
        let destination_address = spawn_fake_worker(destination.clone()).await;

        fixture
            .servers
            .replace_all(&[
                server_record(5, &source_address),
                server_record(7, &destination_address),
            ])
            .unwrap();

        let ids: Vec<i64> = (1..=2500).collect();
        seed_items(&fixture.inventory, &ids, 5, true);

        let moved = fixture.engine.execute(&ids, 7).await.unwrap();
        assert_eq!(moved, 2500);

        let sizes: Vec<usize> = source
            .deactivate_calls
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn test_pool_items_wait_out_the_resolution_window() {
        let fixture = fixture();
        let destination = Arc::new(FakeWorker::default());
        let destination_address = spawn_fake_worker(destination.clone()).await;

        fixture
            .servers
            .replace_all(&[server_record(7, &destination_address)])
            .unwrap();
        seed_items(&fixture.inventory, &[1, 2], 0, false);
        fixture.reservations.claim(2, 9).unwrap();

        let moved = fixture.engine.execute(&[1, 2], 7).await.unwrap();
        assert_eq!(moved, 1);

        let delivered = destination.updates.lock().unwrap();
        assert_eq!(delivered[0].len(), 1);
        assert_eq!(delivered[0][0].id, 1);

        assert!(fixture.reservations.claimed_by(1).unwrap().is_none());
        assert_eq!(fixture.reservations.claimed_by(2).unwrap(), Some(9));
        assert_eq!(fixture.inventory.get_committed(1).unwrap().unwrap().location, 7);
        assert_eq!(fixture.inventory.get_committed(2).unwrap().unwrap().location, 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_parks_rows_at_the_pool() {
        let fixture = fixture();
        let source = Arc::new(FakeWorker::default());
        let source_address = spawn_fake_worker(source.clone()).await;

        fixture
            .servers
            .replace_all(&[
                server_record(5, &source_address),
                server_record(7, "127.0.0.1:1"),
            ])
            .unwrap();
        seed_items(&fixture.inventory, &[1], 5, true);

        let error = fixture.engine.execute(&[1], 7).await.unwrap_err();
        assert!(matches!(error, TessioError::Http(_) | TessioError::PeerUnreachable(_)));

        let row = fixture.inventory.get_committed(1).unwrap().unwrap();
        assert_eq!(row.location, 0);
        assert!(!row.activated);
        assert!(fixture.reservations.claimed_by(1).unwrap().is_none());
    }
}
