//! Built-in analyzers.

pub mod virtualservice;

use crate::Analyzer;

/// Every built-in analyzer, in registration order.
pub fn all() -> Vec<Box<dyn Analyzer>> {
    vec![Box::new(virtualservice::GatewayAnalyzer)]
}

pub fn find(name: &str) -> Option<Box<dyn Analyzer>> {
    all().into_iter().find(|a| a.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_names_are_unique() {
        let mut names: Vec<_> = all().iter().map(|a| a.name()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(find("virtualservice.GatewayAnalyzer").is_some());
        assert!(find("nope").is_none());
    }
}
