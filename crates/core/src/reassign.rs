use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{BindingError, ConnectionProvider, OwnedObject, OwnedObjectKind, QueryActor, Result};

/// Hands everything a user owns to a fallback owner so the user can be
/// dropped.
pub struct ObjectReassigner<'p, 'd> {
    provider: &'p ConnectionProvider<'d>,
    fallback_owner: &'p str,
}

impl<'p, 'd> ObjectReassigner<'p, 'd> {
    #[must_use]
    pub fn new(provider: &'p ConnectionProvider<'d>, fallback_owner: &'p str) -> Self {
        Self {
            provider,
            fallback_owner,
        }
    }

    /// Reassigns in its own committed transaction. Owning nothing, or not
    /// existing at all, is a no-op.
    pub fn reassign_owned_objects(
        &self,
        cancel: &CancellationToken,
        username: &str,
    ) -> Result<usize> {
        let dialect = self.provider.dialect();

        self.provider
            .with_transaction(cancel, |tx| {
                let owned = owned_objects(tx, dialect.owned_objects_query(), username)?;
                for object in &owned {
                    debug!(
                        username,
                        kind = ?object.kind,
                        object = %object.name,
                        owner = self.fallback_owner,
                        "reassigning ownership"
                    );
                    tx.execute(&dialect.reassign_owner(object, self.fallback_owner))?;
                }
                Ok(owned.len())
            })
            .map(|count| {
                if count > 0 {
                    info!(
                        username,
                        count,
                        owner = self.fallback_owner,
                        "reassigned owned objects"
                    );
                }
                count
            })
            .map_err(|source| {
                BindingError::ReassignObjects {
                    username: username.to_string(),
                    source: Box::new(source),
                }
                .into()
            })
    }
}

fn owned_objects(actor: &dyn QueryActor, query: &str, username: &str) -> Result<Vec<OwnedObject>> {
    let rows = actor.query_rows(query, &[username])?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let mut columns = row.into_iter();
            let kind = OwnedObjectKind::parse(&columns.next()?)?;
            let schema = columns.next().filter(|value| !value.trim().is_empty());
            let name = columns.next().filter(|value| !value.trim().is_empty())?;
            Some(OwnedObject { kind, schema, name })
        })
        .collect())
}
