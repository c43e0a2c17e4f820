use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use super::{fmt_date, fmt_ts, parse_date, parse_datetime, parse_uuid, Database};
use crate::auth::hash_password;
use crate::error::{Error, Result};
use crate::models::*;
use crate::phone::validate_phone;

const USER_COLUMNS: &str = "id, city_id, name, role, login, is_active, note, created_at";

const MASTER_COLUMNS: &str =
    "id, city_id, name, birth_date, passport, phone, is_active, chat_id, note, login, created_at";

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    Ok(User {
        id: parse_uuid(row.get(0)?),
        city_id: parse_uuid(row.get(1)?),
        name: row.get(2)?,
        role: Role::from_str(&role).unwrap_or(Role::CallCentre),
        login: row.get(4)?,
        is_active: row.get(5)?,
        note: row.get(6)?,
        created_at: parse_datetime(row.get(7)?),
    })
}

fn row_to_master(row: &Row) -> rusqlite::Result<Master> {
    Ok(Master {
        id: parse_uuid(row.get(0)?),
        city_id: parse_uuid(row.get(1)?),
        name: row.get(2)?,
        birth_date: row.get::<_, Option<String>>(3)?.map(parse_date),
        passport: row.get(4)?,
        phone: row.get(5)?,
        is_active: row.get(6)?,
        chat_id: row.get(7)?,
        note: row.get(8)?,
        login: row.get(9)?,
        created_at: parse_datetime(row.get(10)?),
    })
}

fn require(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

fn require_password(password: &str) -> Result<&str> {
    if password.len() < 6 {
        return Err(Error::validation("Password must be at least 6 characters"));
    }
    Ok(password)
}

impl Database {
    // ============================================================
    // Users
    // ============================================================

    pub fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users
             WHERE (?1 IS NULL OR city_id = ?1)
               AND (?2 IS NULL OR role = ?2)
               AND (?3 IS NULL OR is_active = ?3)
             ORDER BY name",
            USER_COLUMNS
        ))?;

        let users = stmt
            .query_map(
                (
                    filter.city_id.map(|u| u.to_string()),
                    filter.role.map(|r| r.as_str()),
                    filter.is_active,
                ),
                row_to_user,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(users)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.lock();
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                [id.to_string()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let conn = self.lock();
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE login = ?", USER_COLUMNS),
                [login],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_credentials(&self, login: &str) -> Result<Option<Credentials>> {
        let conn = self.lock();
        let creds = conn
            .query_row(
                "SELECT id, password_hash, is_active FROM users WHERE login = ?",
                [login],
                |row| {
                    Ok(Credentials {
                        id: parse_uuid(row.get(0)?),
                        password_hash: row.get(1)?,
                        is_active: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(creds)
    }

    pub fn create_user(&self, input: CreateUserInput) -> Result<User> {
        if input.role == Role::Master {
            return Err(Error::validation(
                "Technicians are registered as masters, not users",
            ));
        }
        let name = require("Name", &input.name)?;
        let login = require("Login", &input.login)?;
        let password_hash = hash_password(require_password(&input.password)?)?;
        self.get_named(ReferenceKind::City, input.city_id)?
            .ok_or(Error::NotFound("City"))?;

        let conn = self.lock();
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (id, city_id, name, role, login, password_hash, is_active, note, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                input.city_id.to_string(),
                &name,
                input.role.as_str(),
                &login,
                &password_hash,
                input.is_active,
                &input.note,
                fmt_ts(now),
            ),
        )?;

        Ok(User {
            id,
            city_id: input.city_id,
            name,
            role: input.role,
            login,
            is_active: input.is_active,
            note: input.note,
            created_at: now,
        })
    }

    pub fn update_user(&self, id: Uuid, input: UpdateUserInput) -> Result<Option<User>> {
        let Some(existing) = self.get_user(id)? else {
            return Ok(None);
        };
        if input.role == Some(Role::Master) {
            return Err(Error::validation(
                "Technicians are registered as masters, not users",
            ));
        }

        let name = match input.name {
            Some(name) => require("Name", &name)?,
            None => existing.name,
        };
        let login = match input.login {
            Some(login) => require("Login", &login)?,
            None => existing.login,
        };
        let password_hash = input
            .password
            .as_deref()
            .map(require_password)
            .transpose()?
            .map(hash_password)
            .transpose()?;

        let user = User {
            id,
            city_id: input.city_id.unwrap_or(existing.city_id),
            name,
            role: input.role.unwrap_or(existing.role),
            login,
            is_active: input.is_active.unwrap_or(existing.is_active),
            note: input.note.or(existing.note),
            created_at: existing.created_at,
        };

        let conn = self.lock();
        conn.execute(
            "UPDATE users SET city_id = ?, name = ?, role = ?, login = ?, is_active = ?, note = ?,
                              password_hash = COALESCE(?, password_hash)
             WHERE id = ?",
            (
                user.city_id.to_string(),
                &user.name,
                user.role.as_str(),
                &user.login,
                user.is_active,
                &user.note,
                password_hash,
                id.to_string(),
            ),
        )?;

        Ok(Some(user))
    }

    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM users WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Masters
    // ============================================================

    pub fn list_masters(&self, filter: &MasterFilter) -> Result<Vec<Master>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM masters
             WHERE (?1 IS NULL OR city_id = ?1)
               AND (?2 IS NULL OR is_active = ?2)
             ORDER BY name",
            MASTER_COLUMNS
        ))?;

        let masters = stmt
            .query_map(
                (filter.city_id.map(|u| u.to_string()), filter.is_active),
                row_to_master,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(masters)
    }

    pub fn get_master(&self, id: Uuid) -> Result<Option<Master>> {
        let conn = self.lock();
        let master = conn
            .query_row(
                &format!("SELECT {} FROM masters WHERE id = ?", MASTER_COLUMNS),
                [id.to_string()],
                row_to_master,
            )
            .optional()?;
        Ok(master)
    }

    pub fn get_master_by_login(&self, login: &str) -> Result<Option<Master>> {
        let conn = self.lock();
        let master = conn
            .query_row(
                &format!("SELECT {} FROM masters WHERE login = ?", MASTER_COLUMNS),
                [login],
                row_to_master,
            )
            .optional()?;
        Ok(master)
    }

    pub fn get_master_credentials(&self, login: &str) -> Result<Option<Credentials>> {
        let conn = self.lock();
        let creds = conn
            .query_row(
                "SELECT id, password_hash, is_active FROM masters WHERE login = ?",
                [login],
                |row| {
                    Ok(Credentials {
                        id: parse_uuid(row.get(0)?),
                        password_hash: row.get(1)?,
                        is_active: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(creds)
    }

    pub fn create_master(&self, input: CreateMasterInput) -> Result<Master> {
        let name = require("Name", &input.name)?;
        let login = require("Login", &input.login)?;
        let phone = validate_phone(&input.phone)?;
        let password_hash = hash_password(require_password(&input.password)?)?;
        self.get_named(ReferenceKind::City, input.city_id)?
            .ok_or(Error::NotFound("City"))?;

        let conn = self.lock();
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO masters (id, city_id, name, birth_date, passport, phone, is_active, chat_id,
                                  note, login, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                input.city_id.to_string(),
                &name,
                input.birth_date.map(fmt_date),
                &input.passport,
                &phone,
                input.is_active,
                &input.chat_id,
                &input.note,
                &login,
                &password_hash,
                fmt_ts(now),
            ),
        )?;

        Ok(Master {
            id,
            city_id: input.city_id,
            name,
            birth_date: input.birth_date,
            passport: input.passport,
            phone,
            is_active: input.is_active,
            chat_id: input.chat_id,
            note: input.note,
            login,
            created_at: now,
        })
    }

    pub fn update_master(&self, id: Uuid, input: UpdateMasterInput) -> Result<Option<Master>> {
        let Some(existing) = self.get_master(id)? else {
            return Ok(None);
        };

        let name = match input.name {
            Some(name) => require("Name", &name)?,
            None => existing.name,
        };
        let login = match input.login {
            Some(login) => require("Login", &login)?,
            None => existing.login,
        };
        let phone = match input.phone {
            Some(phone) => validate_phone(&phone)?,
            None => existing.phone,
        };
        let password_hash = input
            .password
            .as_deref()
            .map(require_password)
            .transpose()?
            .map(hash_password)
            .transpose()?;

        let master = Master {
            id,
            city_id: input.city_id.unwrap_or(existing.city_id),
            name,
            birth_date: input.birth_date.or(existing.birth_date),
            passport: input.passport.or(existing.passport),
            phone,
            is_active: input.is_active.unwrap_or(existing.is_active),
            chat_id: input.chat_id.or(existing.chat_id),
            note: input.note.or(existing.note),
            login,
            created_at: existing.created_at,
        };

        let conn = self.lock();
        conn.execute(
            "UPDATE masters SET city_id = ?, name = ?, birth_date = ?, passport = ?, phone = ?,
                                is_active = ?, chat_id = ?, note = ?, login = ?,
                                password_hash = COALESCE(?, password_hash)
             WHERE id = ?",
            (
                master.city_id.to_string(),
                &master.name,
                master.birth_date.map(fmt_date),
                &master.passport,
                &master.phone,
                master.is_active,
                &master.chat_id,
                &master.note,
                &master.login,
                password_hash,
                id.to_string(),
            ),
        )?;

        Ok(Some(master))
    }

    pub fn delete_master(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM masters WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }
}
