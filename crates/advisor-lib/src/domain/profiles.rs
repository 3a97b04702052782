//! Fixed optimization profiles per research domain
//!
//! Every classification and family preference is a finite table: the
//! detector picks a domain, and everything downstream (MPI library, fabric,
//! placement, tuning keys) is read from here, never inferred.

use crate::models::{BandwidthClass, CommunicationPattern, PlacementGroupType, ResearchDomain};
use std::collections::BTreeMap;

/// Network latency a communication pattern can tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyRequirement {
    UltraLow,
    Low,
    Medium,
    High,
}

/// What the domain's communication shape demands from the network.
#[derive(Debug, Clone, Copy)]
pub struct CommunicationRequirements {
    pub latency: LatencyRequirement,
    pub bandwidth: BandwidthClass,
}

/// Deterministic per-domain optimization profile.
#[derive(Debug, Clone)]
pub struct DomainProfile {
    pub domain: ResearchDomain,
    pub communication_pattern: CommunicationPattern,
    pub requires_efa: bool,
    pub requires_gang_scheduling: bool,
    pub preferred_mpi_library: &'static str,
    pub placement: PlacementGroupType,
    pub optimal_instance_types: &'static [&'static str],
    tuning: &'static [(&'static str, &'static str)],
}

impl DomainProfile {
    /// Opaque tuning keys handed through to the execution plan.
    pub fn tuning_params(&self) -> BTreeMap<String, String> {
        self.tuning
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub fn communication_requirements(&self) -> CommunicationRequirements {
        match self.communication_pattern {
            CommunicationPattern::NearestNeighbor => CommunicationRequirements {
                latency: LatencyRequirement::Medium,
                bandwidth: BandwidthClass::High,
            },
            CommunicationPattern::AllReduce => CommunicationRequirements {
                latency: LatencyRequirement::Low,
                bandwidth: BandwidthClass::VeryHigh,
            },
            CommunicationPattern::EmbarrassinglyParallel => CommunicationRequirements {
                latency: LatencyRequirement::High,
                bandwidth: BandwidthClass::Low,
            },
            CommunicationPattern::TightlyCoupled => CommunicationRequirements {
                latency: LatencyRequirement::UltraLow,
                bandwidth: BandwidthClass::High,
            },
            CommunicationPattern::Unknown => CommunicationRequirements {
                latency: LatencyRequirement::Medium,
                bandwidth: BandwidthClass::Medium,
            },
        }
    }
}

static CLIMATE_MODELING: DomainProfile = DomainProfile {
    domain: ResearchDomain::ClimateModeling,
    communication_pattern: CommunicationPattern::NearestNeighbor,
    requires_efa: true,
    requires_gang_scheduling: true,
    preferred_mpi_library: "OpenMPI",
    placement: PlacementGroupType::Cluster,
    optimal_instance_types: &["c5n.18xlarge", "m5n.24xlarge"],
    tuning: &[
        ("btl", "vader,tcp"),
        ("btl_tcp_if_include", "eth0"),
        ("mpi_leave_pinned", "1"),
        ("btl_tcp_eager_limit", "32768"),
    ],
};

static MACHINE_LEARNING: DomainProfile = DomainProfile {
    domain: ResearchDomain::MachineLearning,
    communication_pattern: CommunicationPattern::AllReduce,
    requires_efa: true,
    requires_gang_scheduling: true,
    preferred_mpi_library: "NCCL",
    placement: PlacementGroupType::Cluster,
    optimal_instance_types: &["p3dn.24xlarge", "p4d.24xlarge"],
    tuning: &[
        ("NCCL_ALGO", "Ring"),
        ("NCCL_MIN_NCHANNELS", "4"),
        ("NCCL_MAX_NCHANNELS", "16"),
        ("NCCL_IB_DISABLE", "0"),
    ],
};

static BIOINFORMATICS: DomainProfile = DomainProfile {
    domain: ResearchDomain::Bioinformatics,
    communication_pattern: CommunicationPattern::EmbarrassinglyParallel,
    requires_efa: false,
    requires_gang_scheduling: false,
    preferred_mpi_library: "OpenMPI",
    placement: PlacementGroupType::Spread,
    optimal_instance_types: &["c5.24xlarge", "r5.12xlarge"],
    tuning: &[("btl", "vader,tcp"), ("mpi_warn_on_fork", "0")],
};

static COMPUTATIONAL_PHYSICS: DomainProfile = DomainProfile {
    domain: ResearchDomain::ComputationalPhysics,
    communication_pattern: CommunicationPattern::TightlyCoupled,
    requires_efa: true,
    requires_gang_scheduling: true,
    preferred_mpi_library: "Intel MPI",
    placement: PlacementGroupType::Cluster,
    optimal_instance_types: &["c5n.18xlarge", "c6in.16xlarge"],
    tuning: &[
        ("I_MPI_FABRICS", "shm:ofi"),
        ("I_MPI_OFI_PROVIDER", "efa"),
        ("I_MPI_PIN_DOMAIN", "omp"),
    ],
};

static UNKNOWN: DomainProfile = DomainProfile {
    domain: ResearchDomain::Unknown,
    communication_pattern: CommunicationPattern::Unknown,
    requires_efa: false,
    requires_gang_scheduling: true,
    preferred_mpi_library: "OpenMPI",
    placement: PlacementGroupType::Cluster,
    optimal_instance_types: &["m5.xlarge"],
    tuning: &[("btl", "vader,tcp")],
};

pub fn profile_for(domain: ResearchDomain) -> &'static DomainProfile {
    match domain {
        ResearchDomain::ClimateModeling => &CLIMATE_MODELING,
        ResearchDomain::MachineLearning => &MACHINE_LEARNING,
        ResearchDomain::Bioinformatics => &BIOINFORMATICS,
        ResearchDomain::ComputationalPhysics => &COMPUTATIONAL_PHYSICS,
        ResearchDomain::Unknown => &UNKNOWN,
    }
}
