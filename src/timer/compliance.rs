//! Compliance gate
//!
//! Facility policy for indicator checks. The gate never blocks a phase from
//! completing; it only reports which confirmation is missing so an advisory
//! can be raised alongside the completion.

use crate::{
    state::{ComplianceFlag, TimerState},
    timer::phase::PhaseKind,
};

/// The confirmation a phase kind requires at completion, if any
pub fn required_flag(kind: PhaseKind) -> Option<ComplianceFlag> {
    match kind {
        PhaseKind::Drying => Some(ComplianceFlag::CiStripIncluded),
        PhaseKind::Autoclave => Some(ComplianceFlag::BiTestPassed),
        PhaseKind::Bath | PhaseKind::Other => None,
    }
}

/// Inspect a completed timer and return the unconfirmed flag to report
pub fn missing_confirmation(timer: &TimerState) -> Option<ComplianceFlag> {
    required_flag(timer.kind).filter(|flag| !timer.flag(*flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_map_to_their_indicator() {
        assert_eq!(required_flag(PhaseKind::Drying), Some(ComplianceFlag::CiStripIncluded));
        assert_eq!(required_flag(PhaseKind::Autoclave), Some(ComplianceFlag::BiTestPassed));
        assert_eq!(required_flag(PhaseKind::Bath), None);
        assert_eq!(required_flag(PhaseKind::Other), None);
    }

    #[test]
    fn confirmed_flag_clears_the_gate() {
        let mut drying = TimerState::new("drying", 900);
        assert_eq!(missing_confirmation(&drying), Some(ComplianceFlag::CiStripIncluded));

        drying.ci_strip_included = true;
        assert_eq!(missing_confirmation(&drying), None);
    }

    #[test]
    fn unrelated_flag_does_not_satisfy_autoclave() {
        let mut autoclave = TimerState::new("autoclave", 1200);
        autoclave.ci_strip_included = true;
        assert_eq!(missing_confirmation(&autoclave), Some(ComplianceFlag::BiTestPassed));
    }
}
