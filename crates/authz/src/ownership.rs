use thiserror::Error;

/// A record with a single owning identity.
pub trait Owned {
    fn owner_id(&self) -> &str;
}

/// The caller is authenticated but does not own the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("identity '{identity}' does not own this record")]
pub struct Forbidden {
    pub identity: String,
}

/// Succeeds only when `identity` is the owner of `resource`.
///
/// Guards update and delete paths. Creation and rating never go through it.
pub fn assert_owner<R: Owned + ?Sized>(resource: &R, identity: &str) -> Result<(), Forbidden> {
    if resource.owner_id() == identity {
        return Ok(());
    }

    tracing::debug!(
        owner_id = resource.owner_id(),
        identity,
        "ownership check failed"
    );
    Err(Forbidden {
        identity: identity.to_string(),
    })
}
