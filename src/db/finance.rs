use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use super::{fmt_date, fmt_ts, parse_date, parse_datetime, parse_decimal, parse_uuid, Database};
use crate::error::{Error, Result};
use crate::models::*;

const PAYOUT_COLUMNS: &str =
    "p.id, p.request_id, p.amount, p.status, p.comment, p.receipt_path, p.created_at, p.updated_at";

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: parse_uuid(row.get(0)?),
        city_id: parse_uuid(row.get(1)?),
        transaction_type_id: parse_uuid(row.get(2)?),
        amount: parse_decimal(row.get(3)?),
        note: row.get(4)?,
        date: parse_date(row.get(5)?),
    })
}

fn row_to_payout(row: &Row) -> rusqlite::Result<Payout> {
    let status: String = row.get(3)?;
    Ok(Payout {
        id: parse_uuid(row.get(0)?),
        request_id: parse_uuid(row.get(1)?),
        amount: parse_decimal(row.get(2)?),
        status: PayoutStatus::from_str(&status).unwrap_or_default(),
        comment: row.get(4)?,
        receipt_path: row.get(5)?,
        created_at: parse_datetime(row.get(6)?),
        updated_at: parse_datetime(row.get(7)?),
    })
}

impl Database {
    // ============================================================
    // Transactions
    // ============================================================

    pub fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, city_id, transaction_type_id, amount, note, date FROM transactions
             WHERE (?1 IS NULL OR city_id = ?1)
               AND (?2 IS NULL OR transaction_type_id = ?2)
               AND (?3 IS NULL OR date >= ?3)
               AND (?4 IS NULL OR date <= ?4)
             ORDER BY date DESC",
        )?;

        let transactions = stmt
            .query_map(
                (
                    filter.city_id.map(|u| u.to_string()),
                    filter.transaction_type_id.map(|u| u.to_string()),
                    filter.start_date.map(fmt_date),
                    filter.end_date.map(fmt_date),
                ),
                row_to_transaction,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(transactions)
    }

    pub fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let conn = self.lock();
        let transaction = conn
            .query_row(
                "SELECT id, city_id, transaction_type_id, amount, note, date FROM transactions WHERE id = ?",
                [id.to_string()],
                row_to_transaction,
            )
            .optional()?;
        Ok(transaction)
    }

    pub fn create_transaction(&self, input: CreateTransactionInput) -> Result<Transaction> {
        self.get_named(ReferenceKind::City, input.city_id)?
            .ok_or(Error::NotFound("City"))?;
        self.get_named(ReferenceKind::TransactionType, input.transaction_type_id)?
            .ok_or(Error::NotFound("Transaction type"))?;

        let transaction = Transaction {
            id: Uuid::new_v4(),
            city_id: input.city_id,
            transaction_type_id: input.transaction_type_id,
            amount: input.amount,
            note: input.note,
            date: input.date.unwrap_or_else(|| Utc::now().date_naive()),
        };

        let conn = self.lock();
        conn.execute(
            "INSERT INTO transactions (id, city_id, transaction_type_id, amount, note, date)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                transaction.id.to_string(),
                transaction.city_id.to_string(),
                transaction.transaction_type_id.to_string(),
                transaction.amount.to_string(),
                &transaction.note,
                fmt_date(transaction.date),
            ),
        )?;

        Ok(transaction)
    }

    pub fn update_transaction(
        &self,
        id: Uuid,
        input: UpdateTransactionInput,
    ) -> Result<Option<Transaction>> {
        let Some(existing) = self.get_transaction(id)? else {
            return Ok(None);
        };
        if let Some(type_id) = input.transaction_type_id {
            self.get_named(ReferenceKind::TransactionType, type_id)?
                .ok_or(Error::NotFound("Transaction type"))?;
        }

        let transaction = Transaction {
            transaction_type_id: input
                .transaction_type_id
                .unwrap_or(existing.transaction_type_id),
            amount: input.amount.unwrap_or(existing.amount),
            note: input.note.or(existing.note),
            date: input.date.unwrap_or(existing.date),
            ..existing
        };

        let conn = self.lock();
        conn.execute(
            "UPDATE transactions SET transaction_type_id = ?, amount = ?, note = ?, date = ? WHERE id = ?",
            (
                transaction.transaction_type_id.to_string(),
                transaction.amount.to_string(),
                &transaction.note,
                fmt_date(transaction.date),
                id.to_string(),
            ),
        )?;

        Ok(Some(transaction))
    }

    pub fn delete_transaction(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM transactions WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    /// Count and total per transaction type. Amounts are summed as decimals
    /// in Rust since they are stored as text.
    pub fn summarize_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionSummary>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT tt.name, t.amount FROM transactions t
             JOIN transaction_types tt ON tt.id = t.transaction_type_id
             WHERE (?1 IS NULL OR t.city_id = ?1)
               AND (?2 IS NULL OR t.transaction_type_id = ?2)
               AND (?3 IS NULL OR t.date >= ?3)
               AND (?4 IS NULL OR t.date <= ?4)
             ORDER BY tt.name",
        )?;

        let rows = stmt
            .query_map(
                (
                    filter.city_id.map(|u| u.to_string()),
                    filter.transaction_type_id.map(|u| u.to_string()),
                    filter.start_date.map(fmt_date),
                    filter.end_date.map(fmt_date),
                ),
                |row| Ok((row.get::<_, String>(0)?, parse_decimal(row.get(1)?))),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summary: Vec<TransactionSummary> = Vec::new();
        for (name, amount) in rows {
            match summary.last_mut() {
                Some(last) if last.transaction_type == name => {
                    last.count += 1;
                    last.total += amount;
                }
                _ => summary.push(TransactionSummary {
                    transaction_type: name,
                    count: 1,
                    total: amount,
                }),
            }
        }

        Ok(summary)
    }

    // ============================================================
    // Payouts
    // ============================================================

    pub fn list_payouts(&self, filter: &PayoutFilter) -> Result<Vec<Payout>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payouts p
             JOIN requests r ON r.id = p.request_id
             WHERE (?1 IS NULL OR p.status = ?1)
               AND (?2 IS NULL OR p.request_id = ?2)
               AND (?3 IS NULL OR r.master_id = ?3)
               AND (?4 IS NULL OR r.city_id = ?4)
             ORDER BY p.created_at DESC",
            PAYOUT_COLUMNS
        ))?;

        let payouts = stmt
            .query_map(
                (
                    filter.status.map(|s| s.as_str()),
                    filter.request_id.map(|u| u.to_string()),
                    filter.master_id.map(|u| u.to_string()),
                    filter.city_id.map(|u| u.to_string()),
                ),
                row_to_payout,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(payouts)
    }

    pub fn get_payout(&self, id: Uuid) -> Result<Option<Payout>> {
        let conn = self.lock();
        let payout = conn
            .query_row(
                &format!("SELECT {} FROM payouts p WHERE p.id = ?", PAYOUT_COLUMNS),
                [id.to_string()],
                row_to_payout,
            )
            .optional()?;
        Ok(payout)
    }

    pub fn get_payout_by_request(&self, request_id: Uuid) -> Result<Option<Payout>> {
        let conn = self.lock();
        let payout = conn
            .query_row(
                &format!("SELECT {} FROM payouts p WHERE p.request_id = ?", PAYOUT_COLUMNS),
                [request_id.to_string()],
                row_to_payout,
            )
            .optional()?;
        Ok(payout)
    }

    /// Move a payout through its review states. The amount is owned by the
    /// settlement rule and cannot be changed here.
    pub fn update_payout(&self, id: Uuid, input: UpdatePayoutInput) -> Result<Option<Payout>> {
        let Some(existing) = self.get_payout(id)? else {
            return Ok(None);
        };

        let payout = Payout {
            status: input.status.unwrap_or(existing.status),
            comment: input.comment.or(existing.comment),
            receipt_path: input.receipt_path.or(existing.receipt_path),
            updated_at: Utc::now(),
            ..existing
        };

        let conn = self.lock();
        conn.execute(
            "UPDATE payouts SET status = ?, comment = ?, receipt_path = ?, updated_at = ?
             WHERE id = ?",
            (
                payout.status.as_str(),
                &payout.comment,
                &payout.receipt_path,
                fmt_ts(payout.updated_at),
                id.to_string(),
            ),
        )?;

        Ok(Some(payout))
    }

    pub fn delete_payout(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM payouts WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }
}
