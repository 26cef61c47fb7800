use std::sync::Arc;

use crate::config::CoreConfig;
use crate::service::{
    admission::CheckInDeduplicator,
    attendance::AttendanceService,
    audit::AuditTrail,
    batcher::{BatchConsumer, LocationUpdateBatcher},
    ledger::AttendanceLedger,
    notify::NotificationSink,
    offpremises::OffPremisesWorkflow,
    presence::PresenceTracker,
    proximity::DeviceProximityPolicy,
    resolver::LocationResolver,
};
use crate::store::AttendanceStore;

/// Service graph shared by every worker. Each keyed registry lives in
/// exactly one component here.
pub struct AppState {
    pub store: Arc<dyn AttendanceStore>,
    pub audit: AuditTrail,
    pub policy: Arc<DeviceProximityPolicy>,
    pub ledger: Arc<AttendanceLedger>,
    pub workflow: Arc<OffPremisesWorkflow>,
    pub attendance: Arc<AttendanceService>,
    pub presence: Arc<PresenceTracker>,
    pub batcher: Arc<LocationUpdateBatcher>,
}

impl AppState {
    pub fn new(
        core: &CoreConfig,
        store: Arc<dyn AttendanceStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Arc<Self>> {
        let audit = AuditTrail::new(Arc::clone(&store));
        let policy = Arc::new(DeviceProximityPolicy::new(
            Arc::clone(&store),
            core.device_radius_cache_ttl,
        ));
        let resolver = Arc::new(LocationResolver::new(Arc::clone(&policy)));
        let ledger = Arc::new(AttendanceLedger::new(
            Arc::clone(&store),
            audit.clone(),
            core.day_offset()?,
        ));
        let admission = Arc::new(CheckInDeduplicator::new(
            Arc::clone(&ledger),
            core.admission_timeout,
        ));
        let workflow = Arc::new(OffPremisesWorkflow::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&admission),
            audit.clone(),
            notifier,
            core.admission_timeout,
            core.provisional_records,
        ));
        let attendance = Arc::new(AttendanceService::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            admission,
            Arc::clone(&resolver),
            Arc::clone(&workflow),
        ));
        let presence = Arc::new(PresenceTracker::new(Arc::clone(&store), resolver));
        let batcher = Arc::new(LocationUpdateBatcher::new(
            core.location_batch,
            Arc::clone(&presence) as Arc<dyn BatchConsumer>,
        ));

        Ok(Arc::new(Self {
            store,
            audit,
            policy,
            ledger,
            workflow,
            attendance,
            presence,
            batcher,
        }))
    }
}
