use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{fmt_ts, parse_datetime, parse_decimal, parse_uuid, Database};
use crate::error::{Error, Result};
use crate::models::*;
use crate::phone::{normalize_phone, validate_phone};
use crate::settlement::{payout_action, PayoutAction, Settlement};

const REQUEST_COLUMNS: &str = "id, city_id, ad_channel_id, request_type_id, client_phone, atc_phone,
    client_name, address, meeting_date, appliance_type, problem, status, master_id, total, expense,
    net, technician_share, master_comment, call_centre_name, call_centre_comment, created_at,
    updated_at";

const FILE_COLUMNS: &str = "id, request_id, kind, file_name, stored_path, uploaded_by, uploaded_at";

fn row_to_request(row: &Row) -> rusqlite::Result<ServiceRequest> {
    let status: String = row.get(11)?;
    Ok(ServiceRequest {
        id: parse_uuid(row.get(0)?),
        city_id: parse_uuid(row.get(1)?),
        ad_channel_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
        request_type_id: row.get::<_, Option<String>>(3)?.map(parse_uuid),
        client_phone: row.get(4)?,
        atc_phone: row.get(5)?,
        client_name: row.get(6)?,
        address: row.get(7)?,
        meeting_date: parse_datetime(row.get(8)?),
        appliance_type: row.get(9)?,
        problem: row.get(10)?,
        status: RequestStatus::from_str(&status).unwrap_or_default(),
        master_id: row.get::<_, Option<String>>(12)?.map(parse_uuid),
        total: row.get::<_, Option<String>>(13)?.map(parse_decimal),
        expense: row.get::<_, Option<String>>(14)?.map(parse_decimal),
        net: row.get::<_, Option<String>>(15)?.map(parse_decimal),
        technician_share: row.get::<_, Option<String>>(16)?.map(parse_decimal),
        master_comment: row.get(17)?,
        call_centre_name: row.get(18)?,
        call_centre_comment: row.get(19)?,
        created_at: parse_datetime(row.get(20)?),
        updated_at: parse_datetime(row.get(21)?),
    })
}

fn row_to_file(row: &Row) -> rusqlite::Result<RequestFile> {
    let kind: String = row.get(2)?;
    Ok(RequestFile {
        id: parse_uuid(row.get(0)?),
        request_id: parse_uuid(row.get(1)?),
        kind: FileKind::from_str(&kind).unwrap_or(FileKind::Bso),
        file_name: row.get(3)?,
        stored_path: row.get(4)?,
        uploaded_by: row.get::<_, Option<String>>(5)?.map(parse_uuid),
        uploaded_at: parse_datetime(row.get(6)?),
    })
}

fn fmt_money(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn query_request(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<ServiceRequest>> {
    conn.query_row(
        &format!("SELECT {} FROM requests WHERE id = ?", REQUEST_COLUMNS),
        [id.to_string()],
        row_to_request,
    )
    .optional()
}

fn exists(conn: &Connection, table: &str, id: Uuid) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", table),
        [id.to_string()],
        |row| row.get(0),
    )
}

/// Check the references and money fields of a request about to be written.
fn validate_request(conn: &Connection, request: &ServiceRequest) -> Result<()> {
    if !exists(conn, "cities", request.city_id)? {
        return Err(Error::NotFound("City"));
    }
    if let Some(id) = request.ad_channel_id {
        if !exists(conn, "ad_channels", id)? {
            return Err(Error::NotFound("Ad channel"));
        }
    }
    if let Some(id) = request.request_type_id {
        if !exists(conn, "request_types", id)? {
            return Err(Error::NotFound("Request type"));
        }
    }
    if let Some(id) = request.master_id {
        if !exists(conn, "masters", id)? {
            return Err(Error::NotFound("Master"));
        }
    }
    for (field, value) in [("total", request.total), ("expense", request.expense)] {
        if value.is_some_and(|v| v < Decimal::ZERO) {
            return Err(Error::validation(format!("{} must not be negative", field)));
        }
    }
    if request.client_name.trim().is_empty() {
        return Err(Error::validation("Client name must not be empty"));
    }
    Ok(())
}

/// Bring the request's payout in line with its settlement. Runs inside the
/// transaction that wrote the request.
fn apply_payout_rule(
    conn: &Connection,
    request: &ServiceRequest,
    now: DateTime<Utc>,
) -> Result<PayoutAction> {
    let existing = conn
        .query_row(
            "SELECT id, amount FROM payouts WHERE request_id = ?",
            [request.id.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    let action = payout_action(
        request.status,
        request.master_id,
        request.technician_share,
        existing.as_ref().map(|(_, amount)| parse_decimal(amount.clone())),
    );

    match action {
        PayoutAction::Create(amount) => {
            conn.execute(
                "INSERT INTO payouts (id, request_id, amount, status, comment, created_at, updated_at)
                 VALUES (?, ?, ?, ?, NULL, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    request.id.to_string(),
                    amount.to_string(),
                    PayoutStatus::Pending.as_str(),
                    fmt_ts(now),
                    fmt_ts(now),
                ),
            )?;
            tracing::info!(request_id = %request.id, %amount, "Payout created");
        }
        PayoutAction::UpdateAmount(amount) => {
            if let Some((payout_id, _)) = &existing {
                conn.execute(
                    "UPDATE payouts SET amount = ?, updated_at = ? WHERE id = ?",
                    (amount.to_string(), fmt_ts(now), payout_id),
                )?;
                tracing::info!(request_id = %request.id, %amount, "Payout amount updated");
            }
        }
        PayoutAction::Keep | PayoutAction::Nothing => {}
    }

    Ok(action)
}

impl Database {
    // ============================================================
    // Service requests
    // ============================================================

    /// List requests, most recent meeting first.
    pub fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<ServiceRequest>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM requests
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR city_id = ?2)
               AND (?3 IS NULL OR master_id = ?3)
               AND (?4 IS NULL OR ad_channel_id = ?4)
               AND (?5 IS NULL OR request_type_id = ?5)
               AND (?6 IS NULL OR client_name LIKE ?6 OR client_phone LIKE ?6 OR address LIKE ?6)
             ORDER BY meeting_date DESC
             LIMIT ?7 OFFSET ?8",
            REQUEST_COLUMNS
        ))?;

        let search = filter
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q));

        let requests = stmt
            .query_map(
                (
                    filter.status.map(|s| s.as_str()),
                    filter.city_id.map(|u| u.to_string()),
                    filter.master_id.map(|u| u.to_string()),
                    filter.ad_channel_id.map(|u| u.to_string()),
                    filter.request_type_id.map(|u| u.to_string()),
                    search,
                    filter.limit.map(i64::from).unwrap_or(-1),
                    filter.offset.map(i64::from).unwrap_or(0),
                ),
                row_to_request,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(requests)
    }

    pub fn get_request(&self, id: Uuid) -> Result<Option<ServiceRequest>> {
        let conn = self.lock();
        Ok(query_request(&conn, id)?)
    }

    /// Create a request and derive its settlement. No payout is created here,
    /// even for a request entered as already `done`; payouts follow updates.
    pub fn create_request(&self, input: CreateRequestInput) -> Result<ServiceRequest> {
        let now = Utc::now();
        let settlement = Settlement::compute(input.total, input.expense);

        let request = ServiceRequest {
            id: Uuid::new_v4(),
            city_id: input.city_id,
            ad_channel_id: input.ad_channel_id,
            request_type_id: input.request_type_id,
            client_phone: validate_phone(&input.client_phone)?,
            atc_phone: input.atc_phone.as_deref().map(normalize_phone),
            client_name: input.client_name.trim().to_string(),
            address: input.address,
            meeting_date: input.meeting_date,
            appliance_type: input.appliance_type,
            problem: input.problem,
            status: input.status.unwrap_or_default(),
            master_id: input.master_id,
            total: input.total,
            expense: input.expense,
            net: settlement.net,
            technician_share: settlement.technician_share,
            master_comment: input.master_comment,
            call_centre_name: input.call_centre_name,
            call_centre_comment: input.call_centre_comment,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        validate_request(&tx, &request)?;

        tx.execute(
            &format!(
                "INSERT INTO requests ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                REQUEST_COLUMNS
            ),
            rusqlite::params![
                request.id.to_string(),
                request.city_id.to_string(),
                request.ad_channel_id.map(|u| u.to_string()),
                request.request_type_id.map(|u| u.to_string()),
                &request.client_phone,
                &request.atc_phone,
                &request.client_name,
                &request.address,
                fmt_ts(request.meeting_date),
                &request.appliance_type,
                &request.problem,
                request.status.as_str(),
                request.master_id.map(|u| u.to_string()),
                fmt_money(request.total),
                fmt_money(request.expense),
                fmt_money(request.net),
                fmt_money(request.technician_share),
                &request.master_comment,
                &request.call_centre_name,
                &request.call_centre_comment,
                fmt_ts(request.created_at),
                fmt_ts(request.updated_at),
            ],
        )?;
        tx.commit()?;

        Ok(request)
    }

    /// Apply a partial update. Derived money fields and the payout are
    /// recomputed from the merged row on every save.
    pub fn update_request(
        &self,
        id: Uuid,
        input: UpdateRequestInput,
    ) -> Result<Option<ServiceRequest>> {
        let now = Utc::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let Some(existing) = query_request(&tx, id)? else {
            return Ok(None);
        };

        let client_phone = match input.client_phone {
            Some(phone) => validate_phone(&phone)?,
            None => existing.client_phone,
        };
        let total = input.total.unwrap_or(existing.total);
        let expense = input.expense.unwrap_or(existing.expense);
        let settlement = Settlement::compute(total, expense);

        let request = ServiceRequest {
            id,
            city_id: input.city_id.unwrap_or(existing.city_id),
            ad_channel_id: input.ad_channel_id.unwrap_or(existing.ad_channel_id),
            request_type_id: input.request_type_id.unwrap_or(existing.request_type_id),
            client_phone,
            atc_phone: input
                .atc_phone
                .as_deref()
                .map(normalize_phone)
                .or(existing.atc_phone),
            client_name: input
                .client_name
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.client_name),
            address: input.address.unwrap_or(existing.address),
            meeting_date: input.meeting_date.unwrap_or(existing.meeting_date),
            appliance_type: input.appliance_type.unwrap_or(existing.appliance_type),
            problem: input.problem.unwrap_or(existing.problem),
            status: input.status.unwrap_or(existing.status),
            master_id: input.master_id.unwrap_or(existing.master_id),
            total,
            expense,
            net: settlement.net,
            technician_share: settlement.technician_share,
            master_comment: input.master_comment.or(existing.master_comment),
            call_centre_name: input.call_centre_name.unwrap_or(existing.call_centre_name),
            call_centre_comment: input.call_centre_comment.or(existing.call_centre_comment),
            created_at: existing.created_at,
            updated_at: now,
        };
        validate_request(&tx, &request)?;

        tx.execute(
            "UPDATE requests SET city_id = ?, ad_channel_id = ?, request_type_id = ?, client_phone = ?,
                    atc_phone = ?, client_name = ?, address = ?, meeting_date = ?, appliance_type = ?,
                    problem = ?, status = ?, master_id = ?, total = ?, expense = ?, net = ?,
                    technician_share = ?, master_comment = ?, call_centre_name = ?,
                    call_centre_comment = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                request.city_id.to_string(),
                request.ad_channel_id.map(|u| u.to_string()),
                request.request_type_id.map(|u| u.to_string()),
                &request.client_phone,
                &request.atc_phone,
                &request.client_name,
                &request.address,
                fmt_ts(request.meeting_date),
                &request.appliance_type,
                &request.problem,
                request.status.as_str(),
                request.master_id.map(|u| u.to_string()),
                fmt_money(request.total),
                fmt_money(request.expense),
                fmt_money(request.net),
                fmt_money(request.technician_share),
                &request.master_comment,
                &request.call_centre_name,
                &request.call_centre_comment,
                fmt_ts(request.updated_at),
                id.to_string(),
            ],
        )?;

        apply_payout_rule(&tx, &request, now)?;
        tx.commit()?;

        Ok(Some(request))
    }

    pub fn delete_request(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM requests WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    /// Requests whose client or line phone matches, latest meeting first.
    /// With a window, only meetings inside `[from, to]` are returned.
    pub fn find_requests_by_phone(
        &self,
        phone: &str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<ServiceRequest>> {
        let phone = normalize_phone(phone);
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM requests
             WHERE (client_phone = ?1 OR atc_phone = ?1)
               AND (?2 IS NULL OR meeting_date >= ?2)
               AND (?3 IS NULL OR meeting_date <= ?3)
             ORDER BY meeting_date DESC",
            REQUEST_COLUMNS
        ))?;

        let requests = stmt
            .query_map(
                (
                    &phone,
                    window.map(|(from, _)| fmt_ts(from)),
                    window.map(|(_, to)| fmt_ts(to)),
                ),
                row_to_request,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(requests)
    }

    /// The newest still-open request (`calling` or `waiting`) from this
    /// client in the given city, created at or after `since`.
    pub fn find_recent_open_request(
        &self,
        city_id: Uuid,
        client_phone: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ServiceRequest>> {
        let conn = self.lock();
        let request = conn
            .query_row(
                &format!(
                    "SELECT {} FROM requests
                     WHERE city_id = ? AND client_phone = ? AND created_at >= ?
                       AND status IN ('calling', 'waiting')
                     ORDER BY created_at DESC
                     LIMIT 1",
                    REQUEST_COLUMNS
                ),
                (
                    city_id.to_string(),
                    normalize_phone(client_phone),
                    fmt_ts(since),
                ),
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    // ============================================================
    // Request files
    // ============================================================

    pub fn list_request_files(&self, request_id: Uuid) -> Result<Vec<RequestFile>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM request_files WHERE request_id = ? ORDER BY uploaded_at",
            FILE_COLUMNS
        ))?;

        let files = stmt
            .query_map([request_id.to_string()], row_to_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(files)
    }

    pub fn get_request_file(&self, request_id: Uuid, file_id: Uuid) -> Result<Option<RequestFile>> {
        let conn = self.lock();
        let file = conn
            .query_row(
                &format!(
                    "SELECT {} FROM request_files WHERE id = ?1 AND request_id = ?2",
                    FILE_COLUMNS
                ),
                [file_id.to_string(), request_id.to_string()],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }

    pub fn attach_file(&self, request_id: Uuid, input: AttachFileInput) -> Result<RequestFile> {
        let conn = self.lock();
        if !exists(&conn, "requests", request_id)? {
            return Err(Error::NotFound("Request"));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO request_files ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                FILE_COLUMNS
            ),
            (
                id.to_string(),
                request_id.to_string(),
                input.kind.as_str(),
                &input.file_name,
                &input.stored_path,
                input.uploaded_by.map(|u| u.to_string()),
                fmt_ts(now),
            ),
        )?;

        Ok(RequestFile {
            id,
            request_id,
            kind: input.kind,
            file_name: input.file_name,
            stored_path: input.stored_path,
            uploaded_by: input.uploaded_by,
            uploaded_at: now,
        })
    }

    /// An already-attached call recording with this original file name.
    pub fn find_audio_by_file_name(&self, file_name: &str) -> Result<Option<RequestFile>> {
        let conn = self.lock();
        let file = conn
            .query_row(
                &format!(
                    "SELECT {} FROM request_files WHERE kind = 'audio' AND file_name = ? LIMIT 1",
                    FILE_COLUMNS
                ),
                [file_name],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }
}
