//! Explicit capability object for mutating calls.
//!
//! Every state-changing operation takes a `&Caller` and checks the role it needs before
//! touching state. There is no ambient authorization.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{AccountId, Result, StrataError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Configuration, pause/unpause, emergency actions.
    Admin,
    /// Operational triggers: harvest, epoch lock/settle, health checks.
    Keeper,
    /// The vault layer: registers and deregisters principal.
    Vault,
    /// Allowed to credit yield, slash, and set rates on tranche ledgers.
    Distributor,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    account: AccountId,
    roles: BTreeSet<Role>,
}

impl Caller {
    pub fn new(account: AccountId, roles: impl IntoIterator<Item = Role>) -> Caller {
        Caller {
            account,
            roles: roles.into_iter().collect(),
        }
    }

    /// Unprivileged end user.
    pub fn user(account: AccountId) -> Caller {
        Caller::new(account, [])
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn has(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn require(&self, role: Role) -> Result<()> {
        if self.has(role) {
            Ok(())
        } else {
            Err(StrataError::Unauthorized {
                account: self.account.to_string(),
                required: role,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn require_checks_role_membership() {
        let keeper = Caller::new(AccountId::from_label("keeper"), [Role::Keeper]);
        assert!(keeper.require(Role::Keeper).is_ok());

        let err = keeper.require(Role::Admin).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn users_hold_no_roles() {
        let alice = Caller::user(AccountId::from_label("alice"));
        for role in [Role::Admin, Role::Keeper, Role::Vault, Role::Distributor] {
            assert!(!alice.has(role));
        }
    }
}
