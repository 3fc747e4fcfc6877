use super::{InspectionTarget, SecurityRule, SecurityViolation};
use std::sync::Arc;

pub struct RuleEngine {
    rules: Vec<Arc<dyn SecurityRule>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Arc<dyn SecurityRule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule against every target it inspects. A rule reports
    /// at most one violation per call, on the first target it matches.
    pub fn evaluate_all(&self, targets: &[InspectionTarget<'_>]) -> Vec<SecurityViolation> {
        let mut violations = Vec::new();

        for rule in &self.rules {
            let hit = targets
                .iter()
                .filter(|target| rule.inspects(target.variable))
                .find_map(|target| rule.check(target).err());
            if let Some(violation) = hit {
                violations.push(violation);
            }
        }

        violations
    }

    pub fn has_blocking_violation(&self, violations: &[SecurityViolation]) -> bool {
        violations.iter().any(|v| v.blocked)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waf::{SqlInjectionDetector, Variable, XssDetector};

    fn engine() -> RuleEngine {
        let mut engine = RuleEngine::new();
        engine.add_rule(Arc::new(SqlInjectionDetector::new(true, true)));
        engine.add_rule(Arc::new(XssDetector::new(true, false)));
        engine
    }

    #[test]
    fn test_one_violation_per_rule() {
        let targets = [
            InspectionTarget::new(Variable::RequestUri, "/a?id=1 OR 1=1"),
            InspectionTarget::new(Variable::RequestBody, "x' OR 'a'='a"),
        ];
        let violations = engine().evaluate_all(&targets);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].variable, Variable::RequestUri);
    }

    #[test]
    fn test_blocking_detection() {
        let engine = engine();
        let targets = [InspectionTarget::new(
            Variable::RequestBody,
            "<script>alert(1)</script>",
        )];
        let violations = engine.evaluate_all(&targets);
        assert_eq!(violations.len(), 1);
        assert!(!engine.has_blocking_violation(&violations));
    }

    #[test]
    fn test_uninspected_variable_ignored() {
        let targets = [InspectionTarget::new(Variable::ResponseBody, "1 OR 1=1")];
        assert!(engine().evaluate_all(&targets).is_empty());
    }
}
