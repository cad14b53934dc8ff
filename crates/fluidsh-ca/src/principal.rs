//! The two disjoint SSH certificate principals (§3 invariant 3, §4.3
//! "Principals").
//!
//! `Sandbox` grants full access to a cloned sandbox's `sandbox` user;
//! `FluidReadonly` grants the restricted `fluid-readonly` access path.
//! A certificate is never issued for both at once — each
//! [`crate::CertificateRequest`] carries exactly one.

use std::fmt;

use crate::error::CaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Principal {
    Sandbox,
    FluidReadonly,
}

impl Principal {
    pub const SANDBOX: &'static str = "sandbox";
    pub const FLUID_READONLY: &'static str = "fluid-readonly";

    pub fn as_str(&self) -> &'static str {
        match self {
            Principal::Sandbox => Self::SANDBOX,
            Principal::FluidReadonly => Self::FLUID_READONLY,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Principal {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::SANDBOX => Ok(Principal::Sandbox),
            Self::FLUID_READONLY => Ok(Principal::FluidReadonly),
            other => Err(CaError::UnknownPrincipal(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        for p in [Principal::Sandbox, Principal::FluidReadonly] {
            let parsed: Principal = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn rejects_unrecognized_principal_strings() {
        assert!("root".parse::<Principal>().is_err());
        assert!("Sandbox".parse::<Principal>().is_err());
    }
}
