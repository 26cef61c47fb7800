use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, MySql, MySqlPool, Transaction};

use super::{AttendanceStore, InsertOutcome, StoreError, StoreResult};
use crate::model::{
    attendance::{ApprovalStatus, AttendanceRecord, NewAttendanceRecord, SessionClose},
    audit::NewAuditEvent,
    device_setting::DeviceProximitySetting,
    location::{AssignedLocation, Coordinate, ReportedLocation},
    offpremises::{NewOffPremisesRequest, OffPremisesRequest, RequestStatus, RequestTransition},
    role::Role,
    staff::StaffProfile,
};

const RECORD_COLUMNS: &str = r#"
    id, user_id, work_date, check_in_time,
    check_in_latitude, check_in_longitude, check_in_place, check_in_accuracy_m,
    check_out_time, check_out_latitude, check_out_longitude, check_out_place, check_out_accuracy_m,
    work_hours, approval_status, on_official_duty_outside_premises, device_class, clock_skew_flagged
"#;

const REQUEST_COLUMNS: &str = r#"
    id, user_id, work_date, latitude, longitude, place_name, accuracy_m, device_info,
    device_class, reason, status, approved_by_id, approved_at, rejection_reason,
    linked_attendance_record_id, created_at
"#;

/// MySQL error code for duplicate key / integrity constraint violations.
const INTEGRITY_VIOLATION: &str = "23000";

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn record_in_tx(
        tx: &mut Transaction<'_, MySql>,
        user_id: u64,
        day: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance_records WHERE user_id = ? AND work_date = ? FOR UPDATE"
        );
        sqlx::query_as::<_, RecordRow>(&sql)
            .bind(user_id)
            .bind(day)
            .fetch_optional(&mut **tx)
            .await?
            .map(AttendanceRecord::try_from)
            .transpose()
    }
}

#[derive(FromRow)]
struct StaffRow {
    user_id: u64,
    role_id: u8,
    department_id: Option<u64>,
    location_id: Option<u64>,
    location_name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl TryFrom<StaffRow> for StaffProfile {
    type Error = StoreError;

    fn try_from(row: StaffRow) -> Result<Self, Self::Error> {
        let role = Role::from_id(row.role_id).ok_or_else(|| StoreError::Corrupt {
            table: "staff_profiles",
            reason: format!("unknown role id {}", row.role_id),
        })?;
        let assigned_location = match (row.location_id, row.location_name, row.latitude, row.longitude) {
            (Some(id), Some(name), Some(lat), Some(lon)) => Some(AssignedLocation {
                id,
                name,
                coordinate: Coordinate::new(lat, lon),
            }),
            _ => None,
        };
        Ok(StaffProfile {
            user_id: row.user_id,
            role,
            department_id: row.department_id,
            assigned_location,
        })
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: u64,
    user_id: u64,
    work_date: NaiveDate,
    check_in_time: DateTime<Utc>,
    check_in_latitude: f64,
    check_in_longitude: f64,
    check_in_place: Option<String>,
    check_in_accuracy_m: Option<f64>,
    check_out_time: Option<DateTime<Utc>>,
    check_out_latitude: Option<f64>,
    check_out_longitude: Option<f64>,
    check_out_place: Option<String>,
    check_out_accuracy_m: Option<f64>,
    work_hours: Option<f64>,
    approval_status: String,
    on_official_duty_outside_premises: bool,
    device_class: String,
    clock_skew_flagged: bool,
}

fn corrupt(table: &'static str, column: &str, value: &str) -> StoreError {
    StoreError::Corrupt {
        table,
        reason: format!("unexpected {column} '{value}'"),
    }
}

impl TryFrom<RecordRow> for AttendanceRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let approval_status = row
            .approval_status
            .parse()
            .map_err(|_| corrupt("attendance_records", "approval_status", &row.approval_status))?;
        let device_class = row
            .device_class
            .parse()
            .map_err(|_| corrupt("attendance_records", "device_class", &row.device_class))?;
        let check_out_location = match (row.check_out_latitude, row.check_out_longitude) {
            (Some(lat), Some(lon)) => Some(ReportedLocation {
                coordinate: Coordinate::new(lat, lon),
                place_name: row.check_out_place,
                accuracy_m: row.check_out_accuracy_m,
            }),
            _ => None,
        };
        Ok(AttendanceRecord {
            id: row.id,
            user_id: row.user_id,
            work_date: row.work_date,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            check_in_location: ReportedLocation {
                coordinate: Coordinate::new(row.check_in_latitude, row.check_in_longitude),
                place_name: row.check_in_place,
                accuracy_m: row.check_in_accuracy_m,
            },
            check_out_location,
            work_hours: row.work_hours,
            approval_status,
            on_official_duty_outside_premises: row.on_official_duty_outside_premises,
            device_class,
            clock_skew_flagged: row.clock_skew_flagged,
        })
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: u64,
    user_id: u64,
    work_date: NaiveDate,
    latitude: f64,
    longitude: f64,
    place_name: Option<String>,
    accuracy_m: Option<f64>,
    device_info: Option<String>,
    device_class: String,
    reason: Option<String>,
    status: String,
    approved_by_id: Option<u64>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    linked_attendance_record_id: Option<u64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for OffPremisesRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|_| corrupt("off_premises_requests", "status", &row.status))?;
        let device_class = row
            .device_class
            .parse()
            .map_err(|_| corrupt("off_premises_requests", "device_class", &row.device_class))?;
        Ok(OffPremisesRequest {
            id: row.id,
            user_id: row.user_id,
            work_date: row.work_date,
            reported_location: ReportedLocation {
                coordinate: Coordinate::new(row.latitude, row.longitude),
                place_name: row.place_name,
                accuracy_m: row.accuracy_m,
            },
            device_info: row.device_info,
            device_class,
            reason: row.reason,
            status,
            approved_by_id: row.approved_by_id,
            approved_at: row.approved_at,
            rejection_reason: row.rejection_reason,
            linked_attendance_record_id: row.linked_attendance_record_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct SettingRow {
    device_class: String,
    check_in_radius_m: f64,
    check_out_radius_m: f64,
}

fn is_integrity_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(INTEGRITY_VIOLATION))
}

#[async_trait]
impl AttendanceStore for MySqlStore {
    async fn staff_profile(&self, user_id: u64) -> StoreResult<Option<StaffProfile>> {
        sqlx::query_as::<_, StaffRow>(
            r#"
            SELECT s.user_id, s.role_id, s.department_id,
                   l.id AS location_id, l.name AS location_name, l.latitude, l.longitude
            FROM staff_profiles s
            LEFT JOIN assigned_locations l ON l.id = s.assigned_location_id
            WHERE s.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(StaffProfile::try_from)
        .transpose()
    }

    async fn approvers_for(&self, department_id: Option<u64>) -> StoreResult<Vec<u64>> {
        let ids = sqlx::query_scalar::<_, u64>(
            r#"
            SELECT user_id FROM staff_profiles
            WHERE role_id IN (?, ?)
               OR (role_id = ? AND department_id IS NOT NULL AND department_id = ?)
            ORDER BY user_id
            "#,
        )
        .bind(Role::Admin.id())
        .bind(Role::RegionalManager.id())
        .bind(Role::DepartmentHead.id())
        .bind(department_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn record(&self, id: u64) -> StoreResult<Option<AttendanceRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM attendance_records WHERE id = ?");
        sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(AttendanceRecord::try_from)
            .transpose()
    }

    async fn record_for_day(
        &self,
        user_id: u64,
        day: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance_records WHERE user_id = ? AND work_date = ?"
        );
        sqlx::query_as::<_, RecordRow>(&sql)
            .bind(user_id)
            .bind(day)
            .fetch_optional(&self.pool)
            .await?
            .map(AttendanceRecord::try_from)
            .transpose()
    }

    async fn insert_record(&self, new: NewAttendanceRecord) -> StoreResult<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = Self::record_in_tx(&mut tx, new.user_id, new.work_date).await? {
            tx.rollback().await?;
            return Ok(InsertOutcome::Existing(existing));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO attendance_records
                (user_id, work_date, check_in_time, check_in_latitude, check_in_longitude,
                 check_in_place, check_in_accuracy_m, approval_status,
                 on_official_duty_outside_premises, device_class)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.user_id)
        .bind(new.work_date)
        .bind(new.check_in_time)
        .bind(new.check_in_location.coordinate.latitude)
        .bind(new.check_in_location.coordinate.longitude)
        .bind(&new.check_in_location.place_name)
        .bind(new.check_in_location.accuracy_m)
        .bind(new.approval_status.as_ref())
        .bind(new.on_official_duty_outside_premises)
        .bind(new.device_class.as_ref())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(result) => {
                let id = result.last_insert_id();
                tx.commit().await?;
                match self.record(id).await? {
                    Some(record) => Ok(InsertOutcome::Inserted(record)),
                    None => Err(StoreError::Corrupt {
                        table: "attendance_records",
                        reason: format!("inserted row {id} vanished"),
                    }),
                }
            }
            // a concurrent writer won the unique (user_id, work_date) key
            Err(e) if is_integrity_violation(&e) => {
                tx.rollback().await?;
                match self.record_for_day(new.user_id, new.work_date).await? {
                    Some(existing) => Ok(InsertOutcome::Existing(existing)),
                    None => Err(StoreError::Database(e)),
                }
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn close_record(
        &self,
        id: u64,
        close: SessionClose,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let location = close.check_out_location.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE attendance_records
            SET check_out_time = ?,
                check_out_latitude = ?,
                check_out_longitude = ?,
                check_out_place = ?,
                check_out_accuracy_m = ?,
                work_hours = ?,
                clock_skew_flagged = ?
            WHERE id = ?
            AND check_out_time IS NULL
            AND approval_status <> ?
            "#,
        )
        .bind(close.check_out_time)
        .bind(location.map(|l| l.coordinate.latitude))
        .bind(location.map(|l| l.coordinate.longitude))
        .bind(location.and_then(|l| l.place_name.clone()))
        .bind(location.and_then(|l| l.accuracy_m))
        .bind(close.work_hours)
        .bind(close.clock_skew_flagged)
        .bind(id)
        .bind(ApprovalStatus::PendingSupervisorApproval.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.record(id).await
    }

    async fn update_record_status(
        &self,
        id: u64,
        from: ApprovalStatus,
        to: ApprovalStatus,
        on_official_duty: bool,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE attendance_records
            SET approval_status = ?, on_official_duty_outside_premises = ?
            WHERE id = ? AND approval_status = ?
            "#,
        )
        .bind(to.as_ref())
        .bind(on_official_duty)
        .bind(id)
        .bind(from.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_record(&self, id: u64, expected: ApprovalStatus) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM attendance_records WHERE id = ? AND approval_status = ?")
                .bind(id)
                .bind(expected.as_ref())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_request(&self, new: NewOffPremisesRequest) -> StoreResult<OffPremisesRequest> {
        let result = sqlx::query(
            r#"
            INSERT INTO off_premises_requests
                (user_id, work_date, latitude, longitude, place_name, accuracy_m, device_info,
                 device_class, reason, status, linked_attendance_record_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.user_id)
        .bind(new.work_date)
        .bind(new.reported_location.coordinate.latitude)
        .bind(new.reported_location.coordinate.longitude)
        .bind(&new.reported_location.place_name)
        .bind(new.reported_location.accuracy_m)
        .bind(&new.device_info)
        .bind(new.device_class.as_ref())
        .bind(&new.reason)
        .bind(RequestStatus::Pending.as_ref())
        .bind(new.linked_attendance_record_id)
        .bind(new.created_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id();
        self.request(id).await?.ok_or_else(|| StoreError::Corrupt {
            table: "off_premises_requests",
            reason: format!("inserted row {id} vanished"),
        })
    }

    async fn request(&self, id: u64) -> StoreResult<Option<OffPremisesRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM off_premises_requests WHERE id = ?");
        sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OffPremisesRequest::try_from)
            .transpose()
    }

    async fn pending_request_for_day(
        &self,
        user_id: u64,
        day: NaiveDate,
    ) -> StoreResult<Option<OffPremisesRequest>> {
        let sql = format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM off_premises_requests
            WHERE user_id = ? AND work_date = ? AND status = ?
            ORDER BY id LIMIT 1
            "#
        );
        sqlx::query_as::<_, RequestRow>(&sql)
            .bind(user_id)
            .bind(day)
            .bind(RequestStatus::Pending.as_ref())
            .fetch_optional(&self.pool)
            .await?
            .map(OffPremisesRequest::try_from)
            .transpose()
    }

    async fn pending_requests(
        &self,
        department_id: Option<u64>,
    ) -> StoreResult<Vec<OffPremisesRequest>> {
        let rows = match department_id {
            None => {
                let sql = format!(
                    "SELECT {REQUEST_COLUMNS} FROM off_premises_requests WHERE status = ? ORDER BY created_at"
                );
                sqlx::query_as::<_, RequestRow>(&sql)
                    .bind(RequestStatus::Pending.as_ref())
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(dept) => {
                let sql = format!(
                    r#"
                    SELECT {REQUEST_COLUMNS} FROM off_premises_requests
                    WHERE status = ?
                    AND user_id IN (SELECT user_id FROM staff_profiles WHERE department_id = ?)
                    ORDER BY created_at
                    "#
                );
                sqlx::query_as::<_, RequestRow>(&sql)
                    .bind(RequestStatus::Pending.as_ref())
                    .bind(dept)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(OffPremisesRequest::try_from).collect()
    }

    async fn transition_request(
        &self,
        id: u64,
        transition: &RequestTransition,
    ) -> StoreResult<Option<OffPremisesRequest>> {
        let to = transition.to_status();
        let from = transition.from_status();

        let query = match transition {
            RequestTransition::Approve { approver_id, at } => sqlx::query(
                r#"
                UPDATE off_premises_requests
                SET status = ?, approved_by_id = ?, approved_at = ?, rejection_reason = NULL
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(to.as_ref())
            .bind(*approver_id)
            .bind(*at),
            RequestTransition::Reject { reason } => sqlx::query(
                r#"
                UPDATE off_premises_requests
                SET status = ?, approved_by_id = NULL, approved_at = NULL, rejection_reason = ?
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(to.as_ref())
            .bind(reason.clone()),
            RequestTransition::Revert => sqlx::query(
                r#"
                UPDATE off_premises_requests
                SET status = ?, approved_by_id = NULL, approved_at = NULL,
                    rejection_reason = NULL, linked_attendance_record_id = NULL
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(to.as_ref()),
            RequestTransition::Reopen { .. } => sqlx::query(
                r#"
                UPDATE off_premises_requests
                SET status = ?, approved_by_id = NULL, approved_at = NULL, rejection_reason = NULL
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(to.as_ref()),
        };

        let result = query
            .bind(id)
            .bind(from.as_ref())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.request(id).await
    }

    async fn link_record(&self, request_id: u64, record_id: Option<u64>) -> StoreResult<()> {
        sqlx::query("UPDATE off_premises_requests SET linked_attendance_record_id = ? WHERE id = ?")
            .bind(record_id)
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn device_settings(&self) -> StoreResult<Vec<DeviceProximitySetting>> {
        let rows = sqlx::query_as::<_, SettingRow>(
            "SELECT device_class, check_in_radius_m, check_out_radius_m FROM device_proximity_settings",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let device_class = row.device_class.parse().map_err(|_| {
                    corrupt("device_proximity_settings", "device_class", &row.device_class)
                })?;
                Ok(DeviceProximitySetting::new(
                    device_class,
                    row.check_in_radius_m,
                    row.check_out_radius_m,
                ))
            })
            .collect()
    }

    async fn replace_device_settings(&self, settings: &[DeviceProximitySetting]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for setting in settings {
            sqlx::query(
                r#"
                INSERT INTO device_proximity_settings (device_class, check_in_radius_m, check_out_radius_m)
                VALUES (?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    check_in_radius_m = VALUES(check_in_radius_m),
                    check_out_radius_m = VALUES(check_out_radius_m)
                "#,
            )
            .bind(setting.device_class.as_ref())
            .bind(setting.check_in_radius_m)
            .bind(setting.check_out_radius_m)
            .execute(&mut *tx)
            .await?;
        }
        // dropping tx without commit rolls back, so a failed row leaves nothing behind
        tx.commit().await?;
        Ok(())
    }

    async fn append_audit(&self, event: NewAuditEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor_id, action, subject_kind, subject_id, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.actor_id)
        .bind(event.action.as_ref())
        .bind(event.subject_kind)
        .bind(event.subject_id)
        .bind(event.detail.to_string())
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
