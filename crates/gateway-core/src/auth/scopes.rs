use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Scope that satisfies every requirement.
pub const WILDCARD_SCOPE: &str = "*";

/// Built-in implication table used when configuration does not supply one.
#[must_use]
pub fn default_scope_table() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        ("messages:admin", &["messages:write", "messages:read", "messages:send"]),
        ("messages:write", &["messages:read", "messages:send"]),
        ("contacts:admin", &["contacts:write", "contacts:read"]),
        ("contacts:write", &["contacts:read"]),
        ("funnels:admin", &["funnels:write", "funnels:read", "funnels:publish"]),
        ("funnels:write", &["funnels:read", "funnels:publish"]),
        ("analytics:admin", &["analytics:read", "analytics:export"]),
        ("realtime:admin", &["realtime:publish", "realtime:read"]),
    ];

    table
        .iter()
        .map(|(scope, implied)| {
            ((*scope).to_string(), implied.iter().map(|s| (*s).to_string()).collect())
        })
        .collect()
}

/// Read-only scope implication lookup.
///
/// Built once at startup. Implications are closed transitively, so a lookup never
/// walks the table: `grants(held, required)` is a set probe per held scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeHierarchy {
    implied: HashMap<String, HashSet<String>>,
}

impl ScopeHierarchy {
    #[must_use]
    pub fn new(table: &BTreeMap<String, Vec<String>>) -> Self {
        let mut implied: HashMap<String, HashSet<String>> = HashMap::with_capacity(table.len());

        for root in table.keys() {
            let mut closure = HashSet::new();
            let mut stack: Vec<&str> = vec![root.as_str()];

            while let Some(scope) = stack.pop() {
                for next in table.get(scope).into_iter().flatten() {
                    if next != root && closure.insert(next.clone()) {
                        stack.push(next);
                    }
                }
            }

            implied.insert(root.clone(), closure);
        }

        Self { implied }
    }

    /// Whether a principal holding `held` satisfies `required`.
    #[must_use]
    pub fn grants(&self, held: &BTreeSet<String>, required: &str) -> bool {
        if held.contains(WILDCARD_SCOPE) || held.contains(required) {
            return true;
        }

        held.iter().any(|scope| self.implied.get(scope).is_some_and(|set| set.contains(required)))
    }

    /// Every required scope not granted by `held`, in input order.
    #[must_use]
    pub fn missing<'a>(&self, held: &BTreeSet<String>, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|scope| !self.grants(held, scope))
            .map(String::as_str)
            .collect()
    }

    #[must_use]
    pub fn implied_by(&self, scope: &str) -> Option<&HashSet<String>> {
        self.implied.get(scope)
    }
}
