use rusqlite::Connection;

use super::newsletter::sync_newsletter_plan;
use crate::db::queries;
use crate::error::Result;
use crate::models::SubscriptionKind;

/// Write the denormalized plan onto the subscription owner.
///
/// All owner plan writes from webhook branches go through here so the user
/// or organization copy and the artist newsletter move together.
/// `label: None` clears the owner's subscription label.
pub fn sync_owner_plan(
    conn: &Connection,
    kind: SubscriptionKind,
    owner_id: &str,
    plan: i64,
    label: Option<&str>,
) -> Result<()> {
    if !queries::set_owner_plan(conn, kind, owner_id, plan, label)? {
        tracing::warn!("No {} owner {} to receive plan {}", kind.as_ref(), owner_id, plan);
        return Ok(());
    }

    if kind == SubscriptionKind::Artist {
        if let Some(user) = queries::get_user_by_id(conn, owner_id)? {
            sync_newsletter_plan(conn, &user, plan)?;
        }
    }

    Ok(())
}

/// Plan rank only (pause / resume keep the label).
pub fn sync_owner_plan_number(
    conn: &Connection,
    kind: SubscriptionKind,
    owner_id: &str,
    plan: i64,
) -> Result<()> {
    queries::set_owner_plan_number(conn, kind, owner_id, plan)?;

    if kind == SubscriptionKind::Artist {
        if let Some(user) = queries::get_user_by_id(conn, owner_id)? {
            sync_newsletter_plan(conn, &user, plan)?;
        }
    }

    Ok(())
}
