use super::error::Error;

pub const ALL: &str = "*";
pub const EMPTY: &str = "";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub project: String,
    pub namespace: String,
    pub guest_cluster: String,
}

impl Scope {
    pub fn new(project: &str, namespace: &str, guest_cluster: &str) -> Scope {
        Scope {
            project: project.to_string(),
            namespace: namespace.to_string(),
            guest_cluster: guest_cluster.to_string(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.project == ALL && self.namespace == ALL && self.guest_cluster == ALL
    }

    /// Strict comparison of two scope entries, used to detect overlapping pools.
    pub fn overlaps(&self, other: &Scope) -> bool {
        Matcher::field(&self.project, &other.project, false)
            && Matcher::field(&self.namespace, &other.namespace, false)
            && Matcher::field(&self.guest_cluster, &other.guest_cluster, false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSelector {
    pub priority: u32,
    pub network: String,
    pub scope: Vec<Scope>,
}

impl PoolSelector {
    /// The selector of a pool serving every request.
    pub fn is_global(&self) -> bool {
        self.scope.len() == 1 && self.scope[0].is_global()
    }
}

/// What a load balancer asks of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirement {
    pub network: String,
    pub project: String,
    pub namespace: String,
    pub cluster: String,
}

impl From<&Scope> for Requirement {
    fn from(scope: &Scope) -> Requirement {
        Requirement {
            network: String::new(),
            project: scope.project.clone(),
            namespace: scope.namespace.clone(),
            cluster: scope.guest_cluster.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Matcher<'a> {
    selector: &'a PoolSelector,
    loose: bool,
}

impl<'a> Matcher<'a> {
    pub fn new(selector: &'a PoolSelector) -> Matcher<'a> {
        Matcher::with_mode(selector, false)
    }

    /// In loose mode an empty project or guest cluster of the pool matches anything.
    pub fn with_mode(selector: &'a PoolSelector, loose: bool) -> Matcher<'a> {
        Matcher { selector, loose }
    }

    pub fn matches(&self, r: &Requirement) -> bool {
        if self.selector.network != r.network {
            return false;
        }
        self.selector.scope.iter().any(|s| self.matches_scope(s, r))
    }

    /// Compares scopes only, regardless of the network.
    pub fn matches_scope(&self, s: &Scope, r: &Requirement) -> bool {
        Matcher::field(&s.project, &r.project, self.loose)
            && Matcher::field(&s.namespace, &r.namespace, false)
            && Matcher::field(&s.guest_cluster, &r.cluster, self.loose)
    }

    fn field(pool: &str, required: &str, empty_matches: bool) -> bool {
        pool == ALL || required == ALL || pool == required || (empty_matches && pool == EMPTY)
    }
}

/// A pool as seen by [`select`].
pub trait Candidate {
    fn name(&self) -> &str;
    fn selector(&self) -> PoolSelector;
    /// Whether the pool is flagged as the global fallback.
    fn is_global(&self) -> bool;
}

/// Picks the matching pool with the highest priority, falling back to the global pool.
///
/// A priority tie goes to the pool with the smallest name, independent of the order of `pools`.
pub fn select<'a, C: Candidate>(
    pools: &'a [C],
    requirement: Option<&Requirement>,
    loose: bool,
) -> Result<Option<&'a C>, Error> {
    let requirement = requirement.ok_or(Error::EmptyRequirement)?;

    let mut sorted: Vec<&C> = pools.iter().collect();
    sorted.sort_by(|a, b| b.name().cmp(a.name()));

    let mut selected: Option<&C> = None;
    let mut global: Option<&C> = None;
    let mut priority = 0;
    for pool in sorted {
        if pool.is_global() {
            global = Some(pool);
            continue;
        }
        let selector = pool.selector();
        if Matcher::with_mode(&selector, loose).matches(requirement) && selector.priority >= priority
        {
            selected = Some(pool);
            priority = selector.priority;
        }
    }

    Ok(selected.or(global))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[derive(Debug, Clone, PartialEq)]
    struct Pool {
        name: String,
        selector: PoolSelector,
        global: bool,
    }

    impl Candidate for Pool {
        fn name(&self) -> &str {
            &self.name
        }
        fn selector(&self) -> PoolSelector {
            self.selector.clone()
        }
        fn is_global(&self) -> bool {
            self.global
        }
    }

    fn pool(name: &str, priority: u32, network: &str, scope: Vec<Scope>) -> Pool {
        Pool {
            name: name.to_string(),
            selector: PoolSelector {
                priority,
                network: network.to_string(),
                scope,
            },
            global: false,
        }
    }

    fn global(name: &str) -> Pool {
        let mut p = pool(name, 0, "", vec![Scope::new(ALL, ALL, ALL)]);
        p.global = true;
        p
    }

    fn requirement(network: &str, project: &str, namespace: &str, cluster: &str) -> Requirement {
        Requirement {
            network: network.to_string(),
            project: project.to_string(),
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
        }
    }

    #[rstest(
        scope,
        req,
        loose,
        expected,
        case(Scope::new("p1", "ns1", "c1"), requirement("", "p1", "ns1", "c1"), false, true),
        case(Scope::new(ALL, "ns1", ALL), requirement("", "p1", "ns1", "c1"), false, true),
        case(Scope::new("p1", "ns1", "c1"), requirement("", ALL, ALL, ALL), false, true),
        case(Scope::new("p1", "ns1", "c1"), requirement("", "p1", "ns2", "c1"), false, false),
        case(Scope::new("", "ns1", ""), requirement("", "p1", "ns1", "c1"), false, false),
        case(Scope::new("", "ns1", ""), requirement("", "p1", "ns1", "c1"), true, true),
        case(Scope::new("p1", "", "c1"), requirement("", "p1", "ns1", "c1"), true, false),
        case(Scope::new(ALL, ALL, ALL), requirement("net1", "p1", "ns1", "c1"), false, false),
    )]
    fn works_matcher(scope: Scope, req: Requirement, loose: bool, expected: bool) {
        let selector = PoolSelector {
            priority: 0,
            network: String::new(),
            scope: vec![scope],
        };
        assert_eq!(expected, Matcher::with_mode(&selector, loose).matches(&req));
    }

    #[test]
    fn works_select_priority() {
        let pools = vec![
            pool("p1", 0, "", vec![Scope::new(ALL, "default", ALL)]),
            pool("p2", 100, "", vec![Scope::new(ALL, "default", ALL)]),
            pool("p3", 200, "", vec![Scope::new(ALL, "other", ALL)]),
        ];
        let req = requirement("", "", "default", "");
        let selected = select(&pools, Some(&req), false).unwrap().unwrap();
        assert_eq!("p2", selected.name);
    }

    #[test]
    fn works_select_tie_is_deterministic() {
        let a = pool("a", 0, "", vec![Scope::new(ALL, "default", ALL)]);
        let b = pool("b", 0, "", vec![Scope::new(ALL, "default", ALL)]);
        let req = requirement("", "", "default", "");
        let forward = vec![a.clone(), b.clone()];
        let backward = vec![b, a];
        assert_eq!("a", select(&forward, Some(&req), false).unwrap().unwrap().name);
        assert_eq!("a", select(&backward, Some(&req), false).unwrap().unwrap().name);
    }

    #[test]
    fn works_select_global_fallback() {
        let pools = vec![
            pool("p1", 10, "", vec![Scope::new(ALL, "other", ALL)]),
            global("global"),
        ];
        let req = requirement("", "", "default", "");
        assert_eq!(
            "global",
            select(&pools, Some(&req), false).unwrap().unwrap().name
        );

        let pools = vec![pool("p1", 10, "", vec![Scope::new(ALL, "other", ALL)])];
        assert!(select(&pools, Some(&req), false).unwrap().is_none());
    }

    #[test]
    fn works_select_scoped_over_global() {
        let pools = vec![
            global("global"),
            pool("p1", 0, "", vec![Scope::new(ALL, "default", ALL)]),
        ];
        let req = requirement("", "", "default", "");
        assert_eq!("p1", select(&pools, Some(&req), false).unwrap().unwrap().name);
    }

    #[test]
    fn fails_select_without_requirement() {
        let pools: Vec<Pool> = vec![];
        assert_eq!(Err(Error::EmptyRequirement), select(&pools, None, false));
    }

    #[test]
    fn works_pool_selector_is_global() {
        let s = PoolSelector {
            scope: vec![Scope::new(ALL, ALL, ALL)],
            ..Default::default()
        };
        assert!(s.is_global());
        let s = PoolSelector {
            scope: vec![Scope::new(ALL, ALL, ALL), Scope::new("p", ALL, ALL)],
            ..Default::default()
        };
        assert!(!s.is_global());
    }
}
