//! Central authorization policy.
//!
//! Every handler routes its role decision through [`authorize`] so the
//! rules live in one place instead of inline role-string comparisons
//! scattered across endpoints.

use crate::errors::ServiceError;

use super::AuthUser;

/// Actions a caller may attempt. Resource ownership is checked separately
/// at lookup time (owner-scoped queries return 404 for non-owners).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Place a new order (customers only; admin accounts are for catalog
    /// management and may not place orders)
    PlaceOrder,
    /// Cancel one of the caller's own orders
    CancelOwnOrder,
    /// View the caller's own orders, addresses, wishlist, reviews
    ViewOwnRecords,
    /// Initiate or finalize a payment for the caller's own order
    PayOwnOrder,
    /// Admin: transition any order's status
    ManageOrders,
    /// Admin: create/update/delete catalog records
    ManageCatalog,
    /// Admin: read revenue and stock reports
    ViewReports,
}

/// Decides whether `caller` may perform `action`. Returns the error the
/// handler should surface verbatim.
pub fn authorize(caller: &AuthUser, action: Action) -> Result<(), ServiceError> {
    match action {
        Action::PlaceOrder => {
            if caller.is_admin() {
                // Distinct from the generic role failure so the storefront
                // can show a specific message.
                Err(ServiceError::Forbidden(
                    "Administrators cannot place orders".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        Action::CancelOwnOrder | Action::ViewOwnRecords | Action::PayOwnOrder => Ok(()),
        Action::ManageOrders | Action::ManageCatalog | Action::ViewReports => {
            if caller.is_admin() {
                Ok(())
            } else {
                Err(ServiceError::Forbidden(
                    "Administrator role required".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(roles: &[&str]) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn admins_cannot_place_orders() {
        let err = authorize(&user(&["admin"]), Action::PlaceOrder).unwrap_err();
        assert!(err.to_string().contains("Administrators cannot place orders"));
    }

    #[test]
    fn customers_place_orders_but_cannot_manage() {
        let customer = user(&["customer"]);
        assert!(authorize(&customer, Action::PlaceOrder).is_ok());
        assert!(authorize(&customer, Action::CancelOwnOrder).is_ok());
        assert!(authorize(&customer, Action::ManageOrders).is_err());
        assert!(authorize(&customer, Action::ViewReports).is_err());
    }

    #[test]
    fn admins_manage_orders_and_catalog() {
        let admin = user(&["admin"]);
        assert!(authorize(&admin, Action::ManageOrders).is_ok());
        assert!(authorize(&admin, Action::ManageCatalog).is_ok());
        assert!(authorize(&admin, Action::ViewReports).is_ok());
    }
}
