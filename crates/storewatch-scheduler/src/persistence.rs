//! SQLite-backed persistence for carts, products, stock alerts and the
//! message audit trail.
//!
//! Business keys are enforced by partial unique indexes:
//! one `abandoned` cart per email, one `pending` alert per product.
//! Upserts are single statements, so overlapping scheduler runs cannot
//! both observe "no row" and insert twice.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use storewatch_core::config::RecoveryPolicy;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::types::{
    AbandonedCart, AlertStatus, AuditStatus, CartItem, CartStatus, CustomerIdentity, LowStockAlert,
    MessageAuditRecord, MessageChannel, Product,
};

/// Engine database. One handle per process, shared through `Arc`.
pub struct EngineDb {
    conn: Mutex<Connection>,
}

const CART_COLUMNS: &str = "id, user_email, user_name, user_id, items, total, abandoned_at, status, \
     reminder_count, last_reminder_at, recovery_token, recovery_discount, recovered_at, \
     recovered_order_id, created_at, updated_at";

const ALERT_COLUMNS: &str = "id, product_id, product_name, current_stock, minimum_stock, \
     threshold_level, status, created_at, resolved_at, notes";

const PRODUCT_COLUMNS: &str = "id, name, sku, stock, minimum_stock, active";

impl EngineDb {
    /// Open or create the engine database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db("DB open"))?;
        // WAL keeps readers (storefront) unblocked while a scan writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::init(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db("DB open"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db("Busy timeout"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreWatchError::Database(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS abandoned_carts (
                id TEXT PRIMARY KEY,
                user_email TEXT NOT NULL,
                user_name TEXT,
                user_id TEXT,
                items TEXT NOT NULL,              -- JSON array of CartItem
                total REAL NOT NULL DEFAULT 0,
                abandoned_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'abandoned',  -- abandoned, recovered, expired
                reminder_count INTEGER NOT NULL DEFAULT 0,
                last_reminder_at TEXT,
                recovery_token TEXT NOT NULL UNIQUE,
                recovery_discount INTEGER,
                recovered_at TEXT,
                recovered_order_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_carts_one_active
                ON abandoned_carts(user_email) WHERE status = 'abandoned';
            CREATE INDEX IF NOT EXISTS idx_carts_status_abandoned_at
                ON abandoned_carts(status, abandoned_at);

            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sku TEXT,
                stock INTEGER NOT NULL DEFAULT 0,
                minimum_stock INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS low_stock_alerts (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                product_name TEXT NOT NULL,
                current_stock INTEGER NOT NULL,
                minimum_stock INTEGER NOT NULL,
                threshold_level INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',    -- pending, resolved
                created_at TEXT NOT NULL,
                resolved_at TEXT,
                notes TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_one_pending
                ON low_stock_alerts(product_id) WHERE status = 'pending';

            -- Append-only delivery log
            CREATE TABLE IF NOT EXISTS message_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,            -- email, whatsapp
                destination TEXT NOT NULL,
                origin TEXT NOT NULL,
                provider_id TEXT,
                template_id TEXT,
                body TEXT,
                status TEXT NOT NULL,             -- sent, failed, timeout
                response TEXT,
                created_at TEXT NOT NULL
            );
            ",
        )
        .map_err(db("Migration"))?;
        Ok(())
    }

    // ─── Abandoned carts ──────────────────────────────────────

    /// Create the active cart for `identity.email`, or refresh the existing
    /// one (snapshot, total, `abandoned_at`). `new_token` is only used when
    /// a row is inserted.
    pub fn upsert_active_cart(
        &self,
        identity: &CustomerIdentity,
        items: &[CartItem],
        total: f64,
        new_token: &str,
        now: DateTime<Utc>,
    ) -> Result<AbandonedCart> {
        let items_json = serde_json::to_string(items)?;
        let now_s = ts(now);
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO abandoned_carts
                 (id, user_email, user_name, user_id, items, total, abandoned_at, status,
                  reminder_count, recovery_token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'abandoned', 0, ?8, ?7, ?7)
             ON CONFLICT(user_email) WHERE status = 'abandoned' DO UPDATE SET
                 items = excluded.items,
                 total = excluded.total,
                 abandoned_at = excluded.abandoned_at,
                 user_name = COALESCE(excluded.user_name, abandoned_carts.user_name),
                 user_id = COALESCE(excluded.user_id, abandoned_carts.user_id),
                 updated_at = excluded.updated_at
             RETURNING {CART_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                uuid::Uuid::new_v4().to_string(),
                identity.email,
                identity.name,
                identity.user_id,
                items_json,
                total,
                now_s,
                new_token,
            ],
            cart_from_row,
        )
        .map_err(db("Upsert cart"))
    }

    pub fn get_cart(&self, id: &str) -> Result<Option<AbandonedCart>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CART_COLUMNS} FROM abandoned_carts WHERE id = ?1"),
            [id],
            cart_from_row,
        )
        .optional()
        .map_err(db("Get cart"))
    }

    pub fn get_cart_by_token(&self, token: &str) -> Result<Option<AbandonedCart>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CART_COLUMNS} FROM abandoned_carts WHERE recovery_token = ?1"),
            [token],
            cart_from_row,
        )
        .optional()
        .map_err(db("Get cart by token"))
    }

    /// All carts for an email, newest first.
    pub fn carts_for_email(&self, email: &str) -> Result<Vec<AbandonedCart>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CART_COLUMNS} FROM abandoned_carts WHERE user_email = ?1
                 ORDER BY created_at DESC"
            ))
            .map_err(db("Prepare carts"))?;
        let rows = stmt
            .query_map([email], cart_from_row)
            .map_err(db("Query carts"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db("Read carts"))
    }

    /// Close every active cart for `email` as recovered. Returns rows closed.
    pub fn close_active_carts(&self, email: &str, order_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE abandoned_carts
             SET status = 'recovered', recovered_at = ?1, recovered_order_id = ?2, updated_at = ?1
             WHERE user_email = ?3 AND status = 'abandoned'",
            params![ts(now), order_id, email],
        )
        .map_err(db("Close carts"))
    }

    /// Active carts inside the reminder window at `now`.
    pub fn carts_due_for_reminder(
        &self,
        now: DateTime<Utc>,
        policy: &RecoveryPolicy,
    ) -> Result<Vec<AbandonedCart>> {
        let oldest = now - policy.max_age();
        let newest = now - policy.min_idle();
        let cooled = now - policy.cooldown();

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CART_COLUMNS} FROM abandoned_carts
                 WHERE status = 'abandoned'
                   AND abandoned_at > ?1
                   AND abandoned_at <= ?2
                   AND reminder_count < ?3
                   AND (last_reminder_at IS NULL OR last_reminder_at <= ?4)
                 ORDER BY abandoned_at ASC"
            ))
            .map_err(db("Prepare due carts"))?;
        let rows = stmt
            .query_map(
                params![ts(oldest), ts(newest), policy.max_reminders, ts(cooled)],
                cart_from_row,
            )
            .map_err(db("Query due carts"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db("Read due carts"))
    }

    /// Record a delivered reminder, but only if nobody else recorded one
    /// since `expected_count` was read. Returns false on a lost race.
    pub fn record_reminder(
        &self,
        cart_id: &str,
        expected_count: u32,
        discount: u32,
        max_reminders: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE abandoned_carts
                 SET reminder_count = MIN(reminder_count + 1, ?1),
                     last_reminder_at = ?2,
                     recovery_discount = ?3,
                     updated_at = ?2
                 WHERE id = ?4 AND reminder_count = ?5 AND status = 'abandoned'",
                params![max_reminders, ts(now), discount, cart_id, expected_count],
            )
            .map_err(db("Record reminder"))?;
        Ok(changed == 1)
    }

    /// Expire active carts abandoned at or before `cutoff`.
    pub fn expire_carts(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE abandoned_carts SET status = 'expired', updated_at = ?1
             WHERE status = 'abandoned' AND abandoned_at <= ?2",
            params![ts(now), ts(cutoff)],
        )
        .map_err(db("Expire carts"))
    }

    // ─── Products ──────────────────────────────────────────────

    /// Insert or replace a catalog row (catalog sync, tests).
    pub fn upsert_product(&self, product: &Product) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO products (id, name, sku, stock, minimum_stock, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name, sku = excluded.sku, stock = excluded.stock,
                 minimum_stock = excluded.minimum_stock, active = excluded.active",
            params![
                product.id,
                product.name,
                product.sku,
                product.stock,
                product.minimum_stock,
                product.active as i32,
            ],
        )
        .map_err(db("Upsert product"))?;
        Ok(())
    }

    pub fn get_product(&self, id: &str) -> Result<Option<Product>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
            [id],
            product_from_row,
        )
        .optional()
        .map_err(db("Get product"))
    }

    /// Active products at or below their minimum.
    pub fn low_stock_products(&self) -> Result<Vec<Product>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products
                 WHERE active = 1 AND stock <= minimum_stock
                 ORDER BY name"
            ))
            .map_err(db("Prepare low stock"))?;
        let rows = stmt
            .query_map([], product_from_row)
            .map_err(db("Query low stock"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db("Read low stock"))
    }

    // ─── Low-stock alerts ────────────────────────────────────

    /// Open a pending alert for `product` unless one is already pending.
    /// Returns the new alert, or `None` if nothing was inserted.
    pub fn insert_pending_alert(
        &self,
        product: &Product,
        now: DateTime<Utc>,
    ) -> Result<Option<LowStockAlert>> {
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO low_stock_alerts
                 (id, product_id, product_name, current_stock, minimum_stock, threshold_level,
                  status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 'pending', ?6)
             ON CONFLICT(product_id) WHERE status = 'pending' DO NOTHING
             RETURNING {ALERT_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                uuid::Uuid::new_v4().to_string(),
                product.id,
                product.name,
                product.stock,
                product.minimum_stock,
                ts(now),
            ],
            alert_from_row,
        )
        .optional()
        .map_err(db("Insert alert"))
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<LowStockAlert>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM low_stock_alerts WHERE id = ?1"),
            [id],
            alert_from_row,
        )
        .optional()
        .map_err(db("Get alert"))
    }

    pub fn pending_alerts(&self) -> Result<Vec<LowStockAlert>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM low_stock_alerts
                 WHERE status = 'pending' ORDER BY created_at"
            ))
            .map_err(db("Prepare alerts"))?;
        let rows = stmt
            .query_map([], alert_from_row)
            .map_err(db("Query alerts"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db("Read alerts"))
    }

    /// Resolve a pending alert. Returns false if it was not pending.
    pub fn resolve_alert(&self, id: &str, notes: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE low_stock_alerts SET status = 'resolved', resolved_at = ?1, notes = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![ts(now), notes, id],
            )
            .map_err(db("Resolve alert"))?;
        Ok(changed == 1)
    }

    // ─── Message audit ───────────────────────────────────────

    pub fn insert_audit(&self, record: &MessageAuditRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO message_audit
                 (channel, destination, origin, provider_id, template_id, body, status, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.channel.as_str(),
                record.destination,
                record.origin,
                record.provider_id,
                record.template_id,
                record.body,
                record.status.as_str(),
                record.response,
                ts(record.created_at),
            ],
        )
        .map_err(db("Save audit"))?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent audit records, newest first.
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<MessageAuditRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT channel, destination, origin, provider_id, template_id, body, status,
                        response, created_at
                 FROM message_audit ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db("Prepare audit"))?;
        let rows = stmt
            .query_map([limit as i64], audit_from_row)
            .map_err(db("Query audit"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db("Read audit"))
    }
}

// ─── Row mapping ──────────────────────────────────────────────

/// Fixed-width UTC timestamps so string comparison in SQL is chronological.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn bad_value(idx: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected {what}").into(),
    )
}

fn cart_from_row(row: &Row<'_>) -> rusqlite::Result<AbandonedCart> {
    let items_raw: String = row.get(4)?;
    let items: Vec<CartItem> = serde_json::from_str(&items_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status_raw: String = row.get(7)?;
    let status = CartStatus::parse(&status_raw).ok_or_else(|| bad_value(7, "cart status"))?;

    Ok(AbandonedCart {
        id: row.get(0)?,
        user_email: row.get(1)?,
        user_name: row.get(2)?,
        user_id: row.get(3)?,
        items,
        total: row.get(5)?,
        abandoned_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        status,
        reminder_count: row.get(8)?,
        last_reminder_at: parse_opt_ts(9, row.get(9)?)?,
        recovery_token: row.get(10)?,
        recovery_discount: row.get(11)?,
        recovered_at: parse_opt_ts(12, row.get(12)?)?,
        recovered_order_id: row.get(13)?,
        created_at: parse_ts(14, &row.get::<_, String>(14)?)?,
        updated_at: parse_ts(15, &row.get::<_, String>(15)?)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        sku: row.get(2)?,
        stock: row.get(3)?,
        minimum_stock: row.get(4)?,
        active: row.get::<_, i32>(5)? != 0,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<LowStockAlert> {
    let status_raw: String = row.get(6)?;
    Ok(LowStockAlert {
        id: row.get(0)?,
        product_id: row.get(1)?,
        product_name: row.get(2)?,
        current_stock: row.get(3)?,
        minimum_stock: row.get(4)?,
        threshold_level: row.get(5)?,
        status: AlertStatus::parse(&status_raw).ok_or_else(|| bad_value(6, "alert status"))?,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        resolved_at: parse_opt_ts(8, row.get(8)?)?,
        notes: row.get(9)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<MessageAuditRecord> {
    let channel = match row.get::<_, String>(0)?.as_str() {
        "email" => MessageChannel::Email,
        "whatsapp" => MessageChannel::Whatsapp,
        _ => return Err(bad_value(0, "channel")),
    };
    let status = match row.get::<_, String>(6)?.as_str() {
        "sent" => AuditStatus::Sent,
        "failed" => AuditStatus::Failed,
        "timeout" => AuditStatus::Timeout,
        _ => return Err(bad_value(6, "audit status")),
    };
    Ok(MessageAuditRecord {
        channel,
        destination: row.get(1)?,
        origin: row.get(2)?,
        provider_id: row.get(3)?,
        template_id: row.get(4)?,
        body: row.get(5)?,
        status,
        response: row.get(7)?,
        created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
    })
}

/// Map a rusqlite error to a `Database` error with context.
pub(crate) fn db(context: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreWatchError {
    move |e| StoreWatchError::Database(format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn item() -> CartItem {
        CartItem {
            product_id: "p1".into(),
            name: "Headphones".into(),
            image: None,
            quantity: 1,
            price: 50_000.0,
        }
    }

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("storewatch-engine-db-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("engine.db");
        std::fs::remove_file(&path).ok();
        {
            let db = EngineDb::open(&path).unwrap();
            assert!(db.pending_alerts().unwrap().is_empty());
        }
        // Reopening an existing file re-runs migrations without error.
        let db = EngineDb::open(&path).unwrap();
        assert!(db.low_stock_products().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_upsert_keeps_token_and_reminders() {
        let db = EngineDb::open_in_memory().unwrap();
        let who = CustomerIdentity::guest("ana@example.com");

        let first = db.upsert_active_cart(&who, &[item()], 50_000.0, "tok-1", t0()).unwrap();
        let later = t0() + chrono::Duration::minutes(5);
        let second = db.upsert_active_cart(&who, &[], 0.0, "tok-2", later).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.recovery_token, "tok-1");
        assert_eq!(second.abandoned_at, later);
        assert!(second.items.is_empty());
        assert_eq!(db.carts_for_email("ana@example.com").unwrap().len(), 1);
    }

    #[test]
    fn test_closed_cart_frees_the_business_key() {
        let db = EngineDb::open_in_memory().unwrap();
        let who = CustomerIdentity::guest("ana@example.com");
        db.upsert_active_cart(&who, &[item()], 1.0, "tok-1", t0()).unwrap();
        assert_eq!(db.close_active_carts("ana@example.com", "order-1", t0()).unwrap(), 1);

        let fresh = db.upsert_active_cart(&who, &[item()], 1.0, "tok-2", t0()).unwrap();
        assert_eq!(fresh.recovery_token, "tok-2");
        assert_eq!(fresh.status, CartStatus::Abandoned);
        assert_eq!(db.carts_for_email("ana@example.com").unwrap().len(), 2);
    }

    #[test]
    fn test_record_reminder_is_compare_and_swap() {
        let db = EngineDb::open_in_memory().unwrap();
        let cart = db
            .upsert_active_cart(&CustomerIdentity::guest("b@x.com"), &[item()], 1.0, "t", t0())
            .unwrap();

        assert!(db.record_reminder(&cart.id, 0, 5, 3, t0()).unwrap());
        // Second writer read the same count and loses.
        assert!(!db.record_reminder(&cart.id, 0, 5, 3, t0()).unwrap());

        let cart = db.get_cart(&cart.id).unwrap().unwrap();
        assert_eq!(cart.reminder_count, 1);
        assert_eq!(cart.recovery_discount, Some(5));
        assert_eq!(cart.last_reminder_at, Some(t0()));
    }

    #[test]
    fn test_pending_alert_is_unique_per_product() {
        let db = EngineDb::open_in_memory().unwrap();
        let product = Product {
            id: "p1".into(),
            name: "Router".into(),
            sku: Some("RT-1".into()),
            stock: 1,
            minimum_stock: 5,
            active: true,
        };
        db.upsert_product(&product).unwrap();

        let alert = db.insert_pending_alert(&product, t0()).unwrap().unwrap();
        assert_eq!(alert.threshold_level, 5);
        assert!(db.insert_pending_alert(&product, t0()).unwrap().is_none());

        assert!(db.resolve_alert(&alert.id, "restocked", t0()).unwrap());
        assert!(!db.resolve_alert(&alert.id, "again", t0()).unwrap());
        assert!(db.insert_pending_alert(&product, t0()).unwrap().is_some());
    }

    #[test]
    fn test_audit_roundtrip() {
        let db = EngineDb::open_in_memory().unwrap();
        db.insert_audit(&MessageAuditRecord {
            channel: MessageChannel::Whatsapp,
            destination: "+244900000000".into(),
            origin: "123".into(),
            provider_id: None,
            template_id: None,
            body: Some("hi".into()),
            status: AuditStatus::Timeout,
            response: Some("timed out".into()),
            created_at: t0(),
        })
        .unwrap();
        let records = db.recent_audit(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::Timeout);
    }

    #[test]
    fn test_timestamps_sort_as_strings() {
        let a = ts(t0());
        let b = ts(t0() + chrono::Duration::milliseconds(1));
        let c = ts(t0() + chrono::Duration::seconds(1));
        assert!(a < b && b < c);
        assert_eq!(parse_ts(0, &a).unwrap(), t0());
    }
}
