//! Postgres-backed policy persistence.
//!
//! Every policy and role link is one row of `authz_policy_rules`:
//!
//! | ptype | v0      | v1     | v2     | v3     |
//! |-------|---------|--------|--------|--------|
//! | `p`   | subject | domain | object | action |
//! | `g`   | user    | role   | domain | (empty)|
//!
//! The domain column holds the tenant UUID, or `*` for the universal domain.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PolicyStoreError |
//! |------------|------------------|
//! | PoolTimedOut, PoolClosed, Io, Tls | `Unavailable` |
//! | Database, anything else | `Persistence` |

use std::str::FromStr;
use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;

use orgguard_auth::{PolicyDomain, PolicyStoreError, PolicyTuple, RoleLink};

use super::persistence::{PolicyPersistence, PolicyRecord};

const POLICY_PTYPE: &str = "p";
const LINK_PTYPE: &str = "g";

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS authz_policy_rules (
    id BIGSERIAL PRIMARY KEY,
    ptype TEXT NOT NULL,
    v0 TEXT NOT NULL,
    v1 TEXT NOT NULL,
    v2 TEXT NOT NULL,
    v3 TEXT NOT NULL DEFAULT '',
    domain TEXT NOT NULL,
    UNIQUE (ptype, v0, v1, v2, v3)
)
"#;

const CREATE_DOMAIN_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS authz_policy_rules_domain_idx ON authz_policy_rules (domain)";

/// One `authz_policy_rules` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRow {
    pub ptype: String,
    pub v0: String,
    pub v1: String,
    pub v2: String,
    pub v3: String,
}

impl From<&PolicyRecord> for PolicyRow {
    fn from(record: &PolicyRecord) -> Self {
        match record {
            PolicyRecord::Policy(p) => Self {
                ptype: POLICY_PTYPE.to_string(),
                v0: p.subject.clone(),
                v1: p.domain.to_string(),
                v2: p.object.clone(),
                v3: p.action.clone(),
            },
            PolicyRecord::Link(l) => Self {
                ptype: LINK_PTYPE.to_string(),
                v0: l.user.clone(),
                v1: l.role.clone(),
                v2: l.domain.to_string(),
                v3: String::new(),
            },
        }
    }
}

impl TryFrom<PolicyRow> for PolicyRecord {
    type Error = PolicyStoreError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        match row.ptype.as_str() {
            POLICY_PTYPE => {
                let tuple = PolicyTuple {
                    subject: row.v0,
                    domain: PolicyDomain::from_str(&row.v1)?,
                    object: row.v2,
                    action: row.v3,
                };
                tuple.validate()?;
                Ok(PolicyRecord::Policy(tuple))
            }
            LINK_PTYPE => Ok(PolicyRecord::Link(RoleLink {
                user: row.v0,
                role: row.v1,
                domain: PolicyDomain::from_str(&row.v2)?,
            })),
            other => Err(PolicyStoreError::InvalidRecord(format!(
                "unknown ptype {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresPolicyPersistence {
    pool: Arc<PgPool>,
}

impl PostgresPolicyPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect, then create the table if it does not exist yet.
    pub async fn connect(url: &str) -> Result<Self, PolicyStoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let persistence = Self::new(pool);
        persistence.ensure_schema().await?;
        Ok(persistence)
    }

    pub async fn ensure_schema(&self) -> Result<(), PolicyStoreError> {
        for statement in [CREATE_TABLE, CREATE_DOMAIN_INDEX] {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PolicyPersistence for PostgresPolicyPersistence {
    #[instrument(skip(self), err)]
    async fn load_all(&self) -> Result<Vec<PolicyRecord>, PolicyStoreError> {
        let rows = sqlx::query("SELECT ptype, v0, v1, v2, v3 FROM authz_policy_rules ORDER BY id ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_all", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let row = PolicyRow {
                ptype: row.try_get("ptype").map_err(|e| map_sqlx_error("load_all", e))?,
                v0: row.try_get("v0").map_err(|e| map_sqlx_error("load_all", e))?,
                v1: row.try_get("v1").map_err(|e| map_sqlx_error("load_all", e))?,
                v2: row.try_get("v2").map_err(|e| map_sqlx_error("load_all", e))?,
                v3: row.try_get("v3").map_err(|e| map_sqlx_error("load_all", e))?,
            };
            records.push(PolicyRecord::try_from(row)?);
        }
        Ok(records)
    }

    /// Replace every row of `domain` inside one transaction.
    #[instrument(skip(self, records), fields(domain = %domain, records = records.len()), err)]
    async fn save_domain(
        &self,
        domain: PolicyDomain,
        records: &[PolicyRecord],
    ) -> Result<(), PolicyStoreError> {
        let domain_key = domain.to_string();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("save_domain", e))?;

        sqlx::query("DELETE FROM authz_policy_rules WHERE domain = $1")
            .bind(&domain_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_domain", e))?;

        for record in records {
            if record.domain() != domain {
                return Err(PolicyStoreError::InvalidRecord(format!(
                    "record for domain {} saved under {}",
                    record.domain(),
                    domain
                )));
            }
            let row = PolicyRow::from(record);
            sqlx::query(
                r#"
                INSERT INTO authz_policy_rules (ptype, v0, v1, v2, v3, domain)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&row.ptype)
            .bind(&row.v0)
            .bind(&row.v1)
            .bind(&row.v2)
            .bind(&row.v3)
            .bind(&domain_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_domain", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("save_domain", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> PolicyStoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            PolicyStoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            PolicyStoreError::Persistence(format!("database error in {operation}: {}", db_err.message()))
        }
        other => PolicyStoreError::Persistence(format!("{operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgguard_core::TenantId;

    fn row(ptype: &str, v: [&str; 4]) -> PolicyRow {
        PolicyRow {
            ptype: ptype.to_string(),
            v0: v[0].to_string(),
            v1: v[1].to_string(),
            v2: v[2].to_string(),
            v3: v[3].to_string(),
        }
    }

    #[test]
    fn policy_tuple_maps_to_p_row() {
        let t = TenantId::new();
        let record = PolicyRecord::Policy(PolicyTuple::new("userX", t, "sales:leads", "view"));
        let tenant = t.to_string();
        assert_eq!(
            PolicyRow::from(&record),
            row("p", ["userX", tenant.as_str(), "sales:leads", "view"])
        );
    }

    #[test]
    fn role_link_maps_to_g_row_with_universal_domain() {
        let record = PolicyRecord::Link(RoleLink::new("alice", "Auditor", PolicyDomain::Universal));
        assert_eq!(PolicyRow::from(&record), row("g", ["alice", "Auditor", "*", ""]));
        assert_eq!(PolicyRecord::try_from(PolicyRow::from(&record)).unwrap(), record);
    }

    #[test]
    fn rejects_unknown_ptype_and_bad_domain() {
        assert!(matches!(
            PolicyRecord::try_from(row("x", ["a", "*", "b", "c"])),
            Err(PolicyStoreError::InvalidRecord(_))
        ));
        assert!(matches!(
            PolicyRecord::try_from(row("p", ["a", "not-a-tenant", "b", "c"])),
            Err(PolicyStoreError::InvalidRecord(_))
        ));
        assert!(matches!(
            PolicyRecord::try_from(row("p", ["a", "*", "", "c"])),
            Err(PolicyStoreError::InvalidRecord(_))
        ));
    }
}
