//! Storefront vocabulary shared by the database layer, services and API.
//!
//! Rows keep these values as plain text columns (guarded by CHECK
//! constraints in the migrations); the enums below are the typed view.

use patterns::phone_regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant
            ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

/// Returned when a stored or submitted value is outside an enum's domain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

text_enum! {
    /// Mobile network operators sold in the storefront
    Operator {
        Mpt => "mpt",
        Ooredoo => "ooredoo",
        Atom => "atom",
        Mytel => "mytel",
    }
}

text_enum! {
    ProductCategory {
        Airtime => "airtime",
        Data => "data",
        Bundle => "bundle",
        Voice => "voice",
        Other => "other",
    }
}

text_enum! {
    OrderStatus {
        Pending => "pending",
        Completed => "completed",
        Rejected => "rejected",
    }
}

text_enum! {
    PaymentRequestStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Mobile wallets accepted for credit purchases
    PaymentMethod {
        KbzPay => "kbzpay",
        WavePay => "wavepay",
        AyaPay => "ayapay",
        CbPay => "cbpay",
    }
}

impl PaymentMethod {
    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentMethod::KbzPay => "KBZPay",
            PaymentMethod::WavePay => "WavePay",
            PaymentMethod::AyaPay => "AYA Pay",
            PaymentMethod::CbPay => "CB Pay",
        }
    }
}

text_enum! {
    /// Ledger entry kinds. The sign of the amount follows the kind.
    CreditTransactionType {
        Purchase => "purchase",
        Order => "order",
        Refund => "refund",
        AdminGrant => "admin_grant",
        AdminDeduct => "admin_deduct",
    }
}

impl CreditTransactionType {
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            CreditTransactionType::Order | CreditTransactionType::AdminDeduct
        )
    }
}

text_enum! {
    ReferenceType {
        Order => "order",
        PaymentRequest => "payment_request",
        Admin => "admin",
    }
}

text_enum! {
    ApprovalTarget {
        Order => "order",
        PaymentRequest => "payment_request",
        Product => "product",
    }
}

text_enum! {
    ApprovalDecision {
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Actions recorded in the admin audit log
    AuditAction {
        ApprovePaymentRequest => "approve_payment_request",
        RejectPaymentRequest => "reject_payment_request",
        ApproveOrder => "approve_order",
        RejectOrder => "reject_order",
        CreateProduct => "create_product",
        UpdateProduct => "update_product",
        DeleteProduct => "delete_product",
        DeactivateProduct => "deactivate_product",
        AdjustCredits => "adjust_credits",
        UpdateUser => "update_user",
        DeleteUser => "delete_user",
        GrantAdmin => "grant_admin",
        RevokeAdmin => "revoke_admin",
    }
}

/// Normalises a Myanmar mobile number to the local `09...` form.
///
/// Accepts `09`, `959` and `+959` prefixes followed by 7 to 9 digits;
/// spaces and dashes are ignored.
pub fn normalize_phone_number(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    let captures = phone_regex().captures(&compact)?;
    Some(format!("09{}", &captures["subscriber"]))
}

/// Masks all but the last three digits, for logs
pub fn mask_phone_number(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().collect();
    if digits.len() <= 3 {
        return "***".to_string();
    }
    let visible: String = digits[digits.len() - 3..].iter().collect();
    format!("{}{}", "*".repeat(digits.len() - 3), visible)
}

mod patterns {
    use regex::Regex;
    use std::sync::OnceLock;

    pub fn phone_regex() -> &'static Regex {
        static PHONE: OnceLock<Regex> = OnceLock::new();
        PHONE.get_or_init(|| {
            Regex::new(r"^(?:\+?959|09)(?P<subscriber>\d{7,9})$").expect("phone regex is valid")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip_through_text() {
        assert_eq!("mpt".parse::<Operator>().unwrap(), Operator::Mpt);
        assert_eq!(" KBZPay ".parse::<PaymentMethod>().unwrap(), PaymentMethod::KbzPay);
        assert_eq!(OrderStatus::Completed.to_string(), "completed");
        assert_eq!(
            CreditTransactionType::AdminDeduct.as_str(),
            "admin_deduct"
        );
    }

    #[test]
    fn test_unknown_variant_error() {
        let err = "telenor".parse::<Operator>().unwrap_err();
        assert_eq!(err.kind, "Operator");
        assert_eq!(err.to_string(), "unknown Operator 'telenor'");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&CreditTransactionType::AdminGrant).unwrap();
        assert_eq!(json, "\"admin_grant\"");
        let method: PaymentMethod = serde_json::from_str("\"wavepay\"").unwrap();
        assert_eq!(method, PaymentMethod::WavePay);
    }

    #[test]
    fn test_debit_kinds() {
        assert!(CreditTransactionType::Order.is_debit());
        assert!(CreditTransactionType::AdminDeduct.is_debit());
        assert!(!CreditTransactionType::Refund.is_debit());
        assert!(!CreditTransactionType::Purchase.is_debit());
    }

    #[test]
    fn test_normalize_phone_number() {
        assert_eq!(
            normalize_phone_number("09 420 123 456").as_deref(),
            Some("09420123456")
        );
        assert_eq!(
            normalize_phone_number("+959-7812-3456").as_deref(),
            Some("0978123456")
        );
        assert_eq!(
            normalize_phone_number("959420123456").as_deref(),
            Some("09420123456")
        );
        assert_eq!(normalize_phone_number("0812345678"), None);
        assert_eq!(normalize_phone_number("09123"), None);
        assert_eq!(normalize_phone_number("09abc123456"), None);
    }

    #[test]
    fn test_mask_phone_number() {
        assert_eq!(mask_phone_number("09420123456"), "********456");
        assert_eq!(mask_phone_number("12"), "***");
    }
}
