use crate::cluster::PeerClient;
use crate::error::{Result, TessioError};
use crate::store::{ActivityStore, InventoryStore, ServerRecord, ServerStore};
use crate::transfer::{TransferEngine, CHUNK_SIZE};
use std::sync::Arc;

/// Joins two unpaired workers into a replication pair. Both nodes are
/// drained to the pool first, then linked, then their items are re-homed
/// in the background; re-delivery through the pool is what seeds each
/// side's backup copies.
pub struct PairServersOperation {
    servers: Arc<ServerStore>,
    inventory: Arc<InventoryStore>,
    peers: Arc<PeerClient>,
    engine: Arc<TransferEngine>,
    activity: Arc<ActivityStore>,
}

pub struct PairServersOperationRequest {
    pub server1_id: i64,
    pub server2_id: i64,
}

#[derive(Debug)]
pub struct PairServersOperationResult {
    pub first: ServerRecord,
    pub second: ServerRecord,
}

impl PairServersOperation {
    pub fn new(
        servers: Arc<ServerStore>,
        inventory: Arc<InventoryStore>,
        peers: Arc<PeerClient>,
        engine: Arc<TransferEngine>,
        activity: Arc<ActivityStore>,
    ) -> Self {
        Self {
            servers,
            inventory,
            peers,
            engine,
            activity,
        }
    }

    pub async fn run(
        &self,
        request: PairServersOperationRequest,
    ) -> Result<PairServersOperationResult> {
        if request.server1_id == request.server2_id {
            return Err(TessioError::InvalidRequest(
                "a server cannot pair with itself".to_string(),
            ));
        }

        let first = self.servers.require(request.server1_id)?;
        let second = self.servers.require(request.server2_id)?;
        if first.partner_id.is_some() || second.partner_id.is_some() {
            return Err(TessioError::InvalidRequest(
                "both servers must be unpaired".to_string(),
            ));
        }

        let drained_first = self.drain(&first).await?;
        let drained_second = self.drain(&second).await?;

        self.link(&first, &second).await?;
        self.servers.pair(first.id, second.id)?;

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

        for (ids, owner) in [(drained_first, first.id), (drained_second, second.id)] {
            if ids.is_empty() {
                continue;
            }
            let plan = self.engine.plan(&ids, owner)?;
            self.engine.dispatch(&plan, owner);
        }

        self.activity.note(
            0,
            "pair",
            &format!("paired servers {} and {}", first.id, second.id),
        );

        Ok(PairServersOperationResult {
            first: self.servers.require(first.id)?,
            second: self.servers.require(second.id)?,
        })
    }

    /// Pulls every item the worker owns back to the pool, mirroring the
    /// returned row images locally.
    async fn drain(&self, record: &ServerRecord) -> Result<Vec<i64>> {
        let ids = self.inventory.ids_at_location(record.id)?;
        let address = format!("{}:{}", record.hostname, record.port);
        let mut drained = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(CHUNK_SIZE) {
            let response = self
                .peers
                .deactivate(&address, chunk, 0, true)
                .await
                .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;

            if !response.clean.is_empty() {
                tracing::warn!(
                    "Server kept rows back during drain: server={} count={}",
                    record.id,
                    response.clean.len()
                );
            }
            if let Some(rows) = response.rows {
                self.inventory.upsert(&rows)?;
            }
            drained.extend(response.deactivated);
        }

        Ok(drained)
    }

    /// Tells both workers about each other. If the second link fails the
    /// first is unwound so no one-sided pairing survives.
    async fn link(&self, first: &ServerRecord, second: &ServerRecord) -> Result<()> {
        let first_address = format!("{}:{}", first.hostname, first.port);
        let second_address = format!("{}:{}", second.hostname, second.port);

        self.peers
            .set_partner(&first_address, Some(second.id))
            .await
            .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;

        if let Err(error) = self.peers.set_partner(&second_address, Some(first.id)).await {
            if let Err(rollback_error) = self.peers.set_partner(&first_address, None).await {
                tracing::warn!(
                    "Pairing rollback failed: server={} error={}",
                    first.id,
                    rollback_error
                );
            }
            return Err(TessioError::PeerUnreachable(error.to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::{ActivateResponse, DeactivateResponse};
    use crate::store::{
        InventoryItem, ReservationStore, ServerStatus, StoreHandle,
    };
    use crate::tasks::TaskQueue;
    use axum::extract::Query;
    use axum::routing::put;
    use axum::{Json, Router};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeWorker {
        partner_calls: Mutex<Vec<Option<i64>>>,
        updates: Mutex<Vec<Vec<InventoryItem>>>,
        fail_partner: AtomicBool,
    }

    async fn spawn_fake_worker(state: Arc<FakeWorker>) -> String {
        let partner_state = state.clone();
        let update_state = state.clone();

        let app = Router::new()
            .route(
                "/inventory/deactivate",
                put(|Query(params): Query<HashMap<String, String>>| async move {
                    let ids: Vec<i64> = params["ids"]
                        .split(',')
                        .map(|value| value.parse().unwrap())
                        .collect();
                    let new_location: i64 = params["new_location"].parse().unwrap();
                    let rows = ids
                        .iter()
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
                        .collect();
                    Json(DeactivateResponse {
                        deactivated: ids,
                        clean: vec![],
                        rows: Some(rows),
                    })
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
                put(|Json(ids): Json<Vec<i64>>| async move {
                    Json(ActivateResponse { activated: ids })
                }),
            )
            .route(
                "/partner",
                put(move |Query(params): Query<HashMap<String, String>>| {
                    let state = partner_state.clone();
                    async move {
                        if state.fail_partner.load(Ordering::SeqCst) {
                            return Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
                        }
                        let partner_id = params.get("partner_id").map(|value| value.parse().unwrap());
                        state.partner_calls.lock().unwrap().push(partner_id);
                        Ok(Json(serde_json::json!({"ok": true})))
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
        operation: PairServersOperation,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let handle = StoreHandle::open(dir.path()).unwrap();
        let servers = Arc::new(ServerStore::new(handle.clone()).unwrap());
        let inventory = Arc::new(InventoryStore::new(handle.clone()).unwrap());
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

        let operation = PairServersOperation::new(
            servers.clone(),
            inventory.clone(),
            peers,
            engine,
            activity,
        );

        Fixture {
            _dir: dir,
            servers,
            inventory,
            operation,
        }
    }

    fn register_fake(servers: &ServerStore, id: i64, address: &str) {
        let (hostname, port) = address.rsplit_once(':').unwrap();
        let mut fleet = servers.list().unwrap();
        fleet.push(ServerRecord {
            id,
            hostname: hostname.to_string(),
            port: port.parse().unwrap(),
            status: ServerStatus::Standalone,
            partner_id: None,
        });
        servers.replace_all(&fleet).unwrap();
    }

    fn seed(inventory: &InventoryStore, ids: &[i64], location: i64) {
        let items: Vec<InventoryItem> = ids
            .iter()
            .map(|&id| InventoryItem {
                id,
                committed: true,
                name: format!("ticket-{}", id),
                location,
                activated: true,
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

    #[tokio::test]
    async fn test_pair_links_workers_and_rehomes_items() {
        let fixture = fixture();
        let first = Arc::new(FakeWorker::default());
        let second = Arc::new(FakeWorker::default());
        let first_address = spawn_fake_worker(first.clone()).await;
        let second_address = spawn_fake_worker(second.clone()).await;
        register_fake(&fixture.servers, 1, &first_address);
        register_fake(&fixture.servers, 2, &second_address);
        seed(&fixture.inventory, &[10, 11], 1);
        seed(&fixture.inventory, &[20], 2);

        let result = fixture
            .operation
            .run(PairServersOperationRequest {
                server1_id: 1,
                server2_id: 2,
            })
            .await
            .unwrap();

        assert_eq!(result.first.partner_id, Some(2));
        assert_eq!(result.second.partner_id, Some(1));
        assert_eq!(result.first.status, ServerStatus::Active);
        assert_eq!(*first.partner_calls.lock().unwrap(), vec![Some(2)]);
        assert_eq!(*second.partner_calls.lock().unwrap(), vec![Some(1)]);

        // Re-homing runs in the background through the pool.
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(fixture.inventory.get_committed(10).unwrap().unwrap().location, 1);
        assert_eq!(fixture.inventory.get_committed(20).unwrap().unwrap().location, 2);

        let first_rows: Vec<i64> = first
            .updates
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|row| !row.on_backup)
            .map(|row| row.id)
            .collect();
        assert!(first_rows.contains(&10));
        let first_copies: Vec<i64> = first
            .updates
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|row| row.on_backup)
            .map(|row| row.id)
            .collect();
        assert!(first_copies.contains(&20));
    }

    #[tokio::test]
    async fn test_failed_second_link_unwinds_the_first() {
        let fixture = fixture();
        let first = Arc::new(FakeWorker::default());
        let second = Arc::new(FakeWorker::default());
        second.fail_partner.store(true, Ordering::SeqCst);
        let first_address = spawn_fake_worker(first.clone()).await;
        let second_address = spawn_fake_worker(second.clone()).await;
        register_fake(&fixture.servers, 1, &first_address);
        register_fake(&fixture.servers, 2, &second_address);

        let error = fixture
            .operation
            .run(PairServersOperationRequest {
                server1_id: 1,
                server2_id: 2,
            })
            .await
            .unwrap_err();

        assert!(matches!(error, TessioError::PeerUnreachable(_)));
        assert_eq!(*first.partner_calls.lock().unwrap(), vec![Some(2), None]);
        assert!(fixture.servers.require(1).unwrap().partner_id.is_none());
        assert!(fixture.servers.require(2).unwrap().partner_id.is_none());
    }

    #[tokio::test]
    async fn test_pairing_rejects_bad_requests() {
        let fixture = fixture();
        let first = Arc::new(FakeWorker::default());
        let first_address = spawn_fake_worker(first).await;
        register_fake(&fixture.servers, 1, &first_address);

        let error = fixture
            .operation
            .run(PairServersOperationRequest {
                server1_id: 1,
                server2_id: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, TessioError::InvalidRequest(_)));

        let error = fixture
            .operation
            .run(PairServersOperationRequest {
                server1_id: 1,
                server2_id: 9,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, TessioError::NotFound(_)));
    }
}
