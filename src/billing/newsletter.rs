//! Newsletter preferences follow the reader's plan: paid readers keep
//! whatever cadence they picked, readers who drop to no plan fall back to
//! the monthly digest.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{NewsletterFrequency, User};

/// Align the user's newsletter row with `plan`. Returns false when the user
/// has no newsletter row.
pub fn sync_newsletter_plan(conn: &Connection, user: &User, plan: i64) -> Result<bool> {
    let newsletter = match queries::get_newsletter_by_user_id(conn, &user.id)? {
        Some(n) => n,
        None => match queries::get_newsletter_by_email(conn, &user.email)? {
            Some(n) => n,
            None => return Ok(false),
        },
    };

    let frequency = if plan == 0 {
        Some(NewsletterFrequency::Monthly)
    } else {
        None
    };

    queries::update_newsletter_plan(conn, &newsletter.id, Some(&user.id), plan, frequency)?;
    tracing::debug!(
        "Newsletter {} synced to plan {} for user {}",
        newsletter.id,
        plan,
        user.id
    );
    Ok(true)
}
