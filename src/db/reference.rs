use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::{parse_uuid, Database};
use crate::error::{Error, Result};
use crate::models::*;
use crate::phone::{normalize_phone, validate_phone};

fn require_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Name must not be empty"));
    }
    Ok(name.to_string())
}

impl Database {
    // ============================================================
    // Named reference lists (cities, request types, transaction types)
    // ============================================================

    pub fn list_named(&self, kind: ReferenceKind) -> Result<Vec<NamedEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name FROM {} ORDER BY name",
            kind.table()
        ))?;

        let entries = stmt
            .query_map([], |row| {
                Ok(NamedEntry {
                    id: parse_uuid(row.get(0)?),
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    pub fn get_named(&self, kind: ReferenceKind, id: Uuid) -> Result<Option<NamedEntry>> {
        let conn = self.lock();
        let entry = conn
            .query_row(
                &format!("SELECT id, name FROM {} WHERE id = ?", kind.table()),
                [id.to_string()],
                |row| {
                    Ok(NamedEntry {
                        id: parse_uuid(row.get(0)?),
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    pub fn create_named(&self, kind: ReferenceKind, input: NamedEntryInput) -> Result<NamedEntry> {
        let name = require_name(&input.name)?;
        let conn = self.lock();
        let id = Uuid::new_v4();

        conn.execute(
            &format!("INSERT INTO {} (id, name) VALUES (?, ?)", kind.table()),
            (id.to_string(), &name),
        )?;

        Ok(NamedEntry { id, name })
    }

    pub fn update_named(
        &self,
        kind: ReferenceKind,
        id: Uuid,
        input: NamedEntryInput,
    ) -> Result<Option<NamedEntry>> {
        let name = require_name(&input.name)?;
        let conn = self.lock();
        let rows = conn.execute(
            &format!("UPDATE {} SET name = ? WHERE id = ?", kind.table()),
            (&name, id.to_string()),
        )?;

        Ok((rows > 0).then_some(NamedEntry { id, name }))
    }

    pub fn delete_named(&self, kind: ReferenceKind, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?", kind.table()),
            [id.to_string()],
        )?;
        Ok(rows > 0)
    }

    /// Look up a city by name, creating it when missing.
    pub fn get_or_create_city(&self, name: &str) -> Result<NamedEntry> {
        let name = require_name(name)?;
        let existing = {
            let conn = self.lock();
            conn.query_row(
                "SELECT id, name FROM cities WHERE name = ?",
                [&name],
                |row| {
                    Ok(NamedEntry {
                        id: parse_uuid(row.get(0)?),
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?
        };

        match existing {
            Some(city) => Ok(city),
            None => self.create_named(ReferenceKind::City, NamedEntryInput { name }),
        }
    }

    // ============================================================
    // Ad channels
    // ============================================================

    pub fn list_ad_channels(&self, city_id: Option<Uuid>) -> Result<Vec<AdChannel>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, city_id, phone FROM ad_channels
             WHERE (?1 IS NULL OR city_id = ?1) ORDER BY name",
        )?;

        let channels = stmt
            .query_map([city_id.map(|u| u.to_string())], |row| {
                Ok(AdChannel {
                    id: parse_uuid(row.get(0)?),
                    name: row.get(1)?,
                    city_id: parse_uuid(row.get(2)?),
                    phone: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(channels)
    }

    pub fn get_ad_channel(&self, id: Uuid) -> Result<Option<AdChannel>> {
        let conn = self.lock();
        let channel = conn
            .query_row(
                "SELECT id, name, city_id, phone FROM ad_channels WHERE id = ?",
                [id.to_string()],
                |row| {
                    Ok(AdChannel {
                        id: parse_uuid(row.get(0)?),
                        name: row.get(1)?,
                        city_id: parse_uuid(row.get(2)?),
                        phone: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(channel)
    }

    pub fn create_ad_channel(&self, input: CreateAdChannelInput) -> Result<AdChannel> {
        let name = require_name(&input.name)?;
        let phone = validate_phone(&input.phone)?;
        self.get_named(ReferenceKind::City, input.city_id)?
            .ok_or(Error::NotFound("City"))?;

        let conn = self.lock();
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO ad_channels (id, name, city_id, phone) VALUES (?, ?, ?, ?)",
            (id.to_string(), &name, input.city_id.to_string(), &phone),
        )?;

        Ok(AdChannel {
            id,
            name,
            city_id: input.city_id,
            phone,
        })
    }

    pub fn update_ad_channel(
        &self,
        id: Uuid,
        input: UpdateAdChannelInput,
    ) -> Result<Option<AdChannel>> {
        let Some(existing) = self.get_ad_channel(id)? else {
            return Ok(None);
        };

        let name = match input.name {
            Some(name) => require_name(&name)?,
            None => existing.name,
        };
        let phone = match input.phone {
            Some(phone) => validate_phone(&phone)?,
            None => existing.phone,
        };
        let city_id = input.city_id.unwrap_or(existing.city_id);

        let conn = self.lock();
        conn.execute(
            "UPDATE ad_channels SET name = ?, city_id = ?, phone = ? WHERE id = ?",
            (&name, city_id.to_string(), &phone, id.to_string()),
        )?;

        Ok(Some(AdChannel {
            id,
            name,
            city_id,
            phone,
        }))
    }

    pub fn delete_ad_channel(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM ad_channels WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // City phones
    // ============================================================

    pub fn list_city_phones(&self, city_id: Option<Uuid>) -> Result<Vec<CityPhone>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, city_id, phone FROM city_phones
             WHERE (?1 IS NULL OR city_id = ?1) ORDER BY city_id, phone",
        )?;

        let phones = stmt
            .query_map([city_id.map(|u| u.to_string())], |row| {
                Ok(CityPhone {
                    id: parse_uuid(row.get(0)?),
                    city_id: parse_uuid(row.get(1)?),
                    phone: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(phones)
    }

    pub fn create_city_phone(&self, input: CityPhoneInput) -> Result<CityPhone> {
        let phone = validate_phone(&input.phone)?;
        self.get_named(ReferenceKind::City, input.city_id)?
            .ok_or(Error::NotFound("City"))?;

        let conn = self.lock();
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO city_phones (id, city_id, phone) VALUES (?, ?, ?)",
            (id.to_string(), input.city_id.to_string(), &phone),
        )?;

        Ok(CityPhone {
            id,
            city_id: input.city_id,
            phone,
        })
    }

    pub fn update_city_phone(&self, id: Uuid, input: CityPhoneInput) -> Result<Option<CityPhone>> {
        let phone = validate_phone(&input.phone)?;
        let conn = self.lock();
        let rows = conn.execute(
            "UPDATE city_phones SET city_id = ?, phone = ? WHERE id = ?",
            (input.city_id.to_string(), &phone, id.to_string()),
        )?;

        Ok((rows > 0).then_some(CityPhone {
            id,
            city_id: input.city_id,
            phone,
        }))
    }

    pub fn delete_city_phone(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM city_phones WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    /// Resolve the city that owns a telephone line: first the city's own
    /// lines, then the numbers advertised on its ad channels.
    pub fn find_city_by_line(&self, line: &str) -> Result<Option<Uuid>> {
        let line = normalize_phone(line);
        let conn = self.lock();

        let city = conn
            .query_row(
                "SELECT city_id FROM city_phones WHERE phone = ?1
                 UNION ALL
                 SELECT city_id FROM ad_channels WHERE phone = ?1
                 LIMIT 1",
                [&line],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(city.map(parse_uuid))
    }

    /// The ad channel advertising a given line, if any.
    pub fn find_ad_channel_by_phone(&self, line: &str) -> Result<Option<Uuid>> {
        let line = normalize_phone(line);
        let conn = self.lock();
        let id = conn
            .query_row(
                "SELECT id FROM ad_channels WHERE phone = ? LIMIT 1",
                [&line],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id.map(parse_uuid))
    }
}
