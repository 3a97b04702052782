//! Research-domain classification and per-domain optimization profiles

mod detector;
mod profiles;

pub use detector::{detect_domain, detect_domain_from_content};
pub use profiles::{
    profile_for, CommunicationRequirements, DomainProfile, LatencyRequirement,
};
