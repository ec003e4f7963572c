use std::rc::Rc;

use tracing::debug;

use super::env::Environment;
use super::function::{
    core_functions, dataframe_functions, list_functions, math_functions, stats_functions,
    string_functions, Builtin, FunctionValue,
};
use super::{pipeline, tdoc, Value};

/// A named group of builtins, the unit of `package_info` introspection.
pub struct Package {
    pub name: &'static str,
    pub title: &'static str,
    pub builtins: Vec<Rc<Builtin>>,
}

pub struct PackageRegistry {
    pub packages: Vec<Package>,
}

impl PackageRegistry {
    /// Every package the interpreter ships with.
    pub fn standard() -> Self {
        let packages = vec![
            Package {
                name: "base",
                title: "Core predicates, conversions, assertions and collections",
                builtins: core_functions::builtins()
                    .into_iter()
                    .chain(list_functions::builtins())
                    .map(Rc::new)
                    .collect(),
            },
            Package {
                name: "math",
                title: "Scalar and ndarray math",
                builtins: math_functions::builtins().into_iter().map(Rc::new).collect(),
            },
            Package {
                name: "stats",
                title: "Descriptive statistics and linear models",
                builtins: stats_functions::builtins()
                    .into_iter()
                    .map(Rc::new)
                    .collect(),
            },
            Package {
                name: "strings",
                title: "String manipulation",
                builtins: string_functions::builtins()
                    .into_iter()
                    .map(Rc::new)
                    .collect(),
            },
            Package {
                name: "data",
                title: "DataFrames, data verbs and CSV I/O",
                builtins: dataframe_functions::builtins()
                    .into_iter()
                    .map(Rc::new)
                    .collect(),
            },
            Package {
                name: "pipeline",
                title: "Reproducible pipelines, artifacts and time travel",
                builtins: pipeline::builtins().into_iter().map(Rc::new).collect(),
            },
            Package {
                name: "doc",
                title: "Documentation and introspection",
                builtins: tdoc::builtins().into_iter().map(Rc::new).collect(),
            },
        ];
        Self { packages }
    }

    /// Install every binding into the root frame.
    pub fn seed(&self, env: &Environment) {
        let mut count = 0;
        for pkg in &self.packages {
            for builtin in &pkg.builtins {
                env.force_define(
                    builtin.name,
                    Value::Function(FunctionValue::Builtin(builtin.clone())),
                );
                count += 1;
            }
        }
        debug!("seeded {count} builtins from {} packages", self.packages.len());
    }

    pub fn find(&self, name: &str) -> Option<(&Package, &Rc<Builtin>)> {
        for pkg in &self.packages {
            if let Some(b) = pkg.builtins.iter().find(|b| b.name == name) {
                return Some((pkg, b));
            }
        }
        None
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::eval::Interpreter;

    #[test]
    fn registry_has_no_duplicate_names() {
        let registry = PackageRegistry::standard();
        let mut seen = std::collections::HashSet::new();
        for pkg in &registry.packages {
            for b in &pkg.builtins {
                assert!(seen.insert(b.name), "duplicate builtin `{}`", b.name);
            }
        }
    }

    #[test]
    fn seeding_makes_builtins_callable() {
        let interp = Interpreter::new();
        assert_eq!(
            interp.eval_source("typeof(mean)"),
            Value::String("function".into())
        );
    }

    #[test]
    fn user_bindings_can_shadow_builtins_in_child_scope() {
        let interp = Interpreter::new();
        assert_eq!(interp.eval_source("mean = 5\nmean"), Value::Int(5));
    }

    #[test]
    fn find_reports_the_owning_package() {
        let registry = PackageRegistry::standard();
        let (pkg, b) = registry.find("filter").unwrap();
        assert_eq!(pkg.name, "data");
        assert!(b.raw);
    }
}
