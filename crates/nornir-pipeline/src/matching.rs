//! Tagged-union dispatch.
//!
//! A match step reads a discriminant field from its value and runs the
//! sub-pipeline registered for that literal. The table is checked when the
//! step is appended: it must be non-empty, free of duplicates and, when the
//! input type declares its variant set, cover every variant unless a
//! [`MATCH_FALLBACK`] arm is present.
//!
//! At run time a discriminant with no arm selects the fallback arm if one
//! was registered, otherwise the step fails with a no-match error.

use std::collections::HashMap;
use std::sync::Arc;

use nornir_core::{NornirError, NornirResult};

use crate::options::PipelineOptions;
use crate::pipeline::{ContextHandler, Nornir};
use crate::step::{erase, recover, Step, StepKind};

/// Reserved arm name for the fallback entry.
pub const MATCH_FALLBACK: &str = "_";

/// A value carrying string discriminants.
pub trait Tagged {
    /// Returns the literal value of the discriminant `field`, if present.
    fn tag(&self, field: &str) -> Option<&str>;

    /// Returns every literal `field` can take, if the set is closed.
    ///
    /// Types returning `Some` get a build-time exhaustiveness check.
    fn variants(field: &str) -> Option<&'static [&'static str]> {
        let _ = field;
        None
    }
}

impl Tagged for serde_json::Value {
    fn tag(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(serde_json::Value::as_str)
    }
}

/// Collects the arms of a match step.
pub struct MatchBuilder<In, Out> {
    arms: HashMap<String, ContextHandler<In, Out>>,
    options: PipelineOptions,
    errors: Vec<NornirError>,
}

impl<In, Out> MatchBuilder<In, Out>
where
    In: Tagged + Send + 'static,
    Out: Send + 'static,
{
    fn new(options: PipelineOptions) -> Self {
        Self {
            arms: HashMap::new(),
            options,
            errors: Vec::new(),
        }
    }

    /// Compiles a sub-pipeline for values whose discriminant equals `tag`.
    #[must_use]
    pub fn arm<B>(mut self, tag: impl Into<String>, build: B) -> Self
    where
        B: FnOnce(Nornir<In, In>) -> Nornir<In, Out>,
    {
        let tag = tag.into();
        if self.arms.contains_key(&tag) {
            self.errors
                .push(NornirError::build(format!("duplicate match arm `{tag}`")));
            return self;
        }

        match build(Nornir::with_options(self.options.clone())).build_with_context() {
            Ok(handler) => {
                self.arms.insert(tag, handler);
            }
            Err(error) => self.errors.push(error),
        }
        self
    }

    /// Compiles the sub-pipeline for discriminants with no arm.
    #[must_use]
    pub fn fallback<B>(self, build: B) -> Self
    where
        B: FnOnce(Nornir<In, In>) -> Nornir<In, Out>,
    {
        self.arm(MATCH_FALLBACK, build)
    }

    fn finish(self, field: &str) -> NornirResult<HashMap<String, ContextHandler<In, Out>>> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        if self.arms.is_empty() {
            return Err(NornirError::build(format!(
                "match on `{field}` has no arms"
            )));
        }

        if let Some(variants) = In::variants(field) {
            let mut unknown: Vec<&str> = self
                .arms
                .keys()
                .map(String::as_str)
                .filter(|tag| *tag != MATCH_FALLBACK && !variants.iter().any(|v| v == tag))
                .collect();
            if !unknown.is_empty() {
                unknown.sort_unstable();
                return Err(NornirError::build(format!(
                    "match on `{field}` has arms for unknown variants: {}",
                    unknown.join(", ")
                )));
            }

            if !self.arms.contains_key(MATCH_FALLBACK) {
                let missing: Vec<&str> = variants
                    .iter()
                    .copied()
                    .filter(|variant| !self.arms.contains_key(*variant))
                    .collect();
                if !missing.is_empty() {
                    return Err(NornirError::build(format!(
                        "match on `{field}` is not exhaustive, missing: {}",
                        missing.join(", ")
                    )));
                }
            }
        }

        Ok(self.arms)
    }
}

impl<In, Out> Nornir<In, Out>
where
    In: Send + 'static,
    Out: Tagged + Send + 'static,
{
    /// Appends a match step on the discriminant `field`.
    ///
    /// # Example
    ///
    /// ```
    /// use nornir_pipeline::nornir;
    /// use serde_json::{json, Value};
    ///
    /// # tokio_test::block_on(async {
    /// let handler = nornir::<Value>()
    ///     .use_match("type", |m| {
    ///         m.arm("circle", |p| p.map(|v| Ok(v["r"].as_f64().unwrap_or(0.0) * 2.0)))
    ///             .arm("square", |p| p.map(|v| Ok(v["side"].as_f64().unwrap_or(0.0))))
    ///     })
    ///     .build()
    ///     .unwrap();
    ///
    /// let width = handler.call(json!({"type": "circle", "r": 1.5})).await.unwrap();
    /// assert_eq!(width, 3.0);
    /// assert!(handler.call(json!({"type": "hexagon"})).await.unwrap_err().is_no_match());
    /// # });
    /// ```
    pub fn use_match<Next, B>(self, field: impl Into<String>, build: B) -> Nornir<In, Next>
    where
        Next: Send + 'static,
        B: FnOnce(MatchBuilder<Out, Next>) -> MatchBuilder<Out, Next>,
    {
        let field: Arc<str> = Arc::from(field.into());
        let arms = match build(MatchBuilder::new(self.options())).finish(&field) {
            Ok(arms) => Arc::new(arms),
            Err(error) => {
                self.record_error(error);
                return self.push(Step::new(StepKind::Match, |_, _| {
                    Box::pin(async { Err(NornirError::build("match failed to build")) })
                }));
            }
        };

        self.push(Step::new(StepKind::Match, move |state, registry| {
            let arms = Arc::clone(&arms);
            let field = Arc::clone(&field);
            Box::pin(async move {
                let value: Out = recover(state?)?;
                let tag = value.tag(&field).map(str::to_owned);
                let handler = tag
                    .as_deref()
                    .and_then(|tag| arms.get(tag))
                    .or_else(|| arms.get(MATCH_FALLBACK))
                    .cloned()
                    .ok_or_else(|| {
                        NornirError::no_match(tag.clone().unwrap_or_else(|| "<none>".to_string()))
                    })?;
                handler.call(Ok(value), registry).await.map(erase)
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nornir;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    const SHAPE_KINDS: &[&str] = &["circle", "square"];

    #[derive(Debug, Clone, PartialEq)]
    enum Shape {
        Circle(f64),
        Square(f64),
    }

    impl Tagged for Shape {
        fn tag(&self, field: &str) -> Option<&str> {
            match (field, self) {
                ("kind", Self::Circle(_)) => Some("circle"),
                ("kind", Self::Square(_)) => Some("square"),
                _ => None,
            }
        }

        fn variants(field: &str) -> Option<&'static [&'static str]> {
            (field == "kind").then_some(SHAPE_KINDS)
        }
    }

    fn area_of(shape: &Shape) -> f64 {
        match shape {
            Shape::Circle(r) => 3.0 * r * r,
            Shape::Square(s) => s * s,
        }
    }

    #[tokio::test]
    async fn test_closed_union_dispatch() {
        let handler = nornir::<Shape>()
            .use_match("kind", |m| {
                m.arm("circle", |p| p.map(|s| Ok(format!("circle {}", area_of(&s)))))
                    .arm("square", |p| p.map(|s| Ok(format!("square {}", area_of(&s)))))
            })
            .build()
            .unwrap();

        assert_eq!(handler.call(Shape::Circle(1.0)).await.unwrap(), "circle 3");
        assert_eq!(handler.call(Shape::Square(2.0)).await.unwrap(), "square 4");
    }

    #[test]
    fn test_non_exhaustive_is_build_error() {
        let err = nornir::<Shape>()
            .use_match("kind", |m| m.arm("circle", |p| p.map(|_| Ok(1))))
            .build()
            .unwrap_err();

        assert!(err.is_build());
        assert!(err.to_string().contains("missing: square"));
    }

    #[test]
    fn test_fallback_makes_table_exhaustive() {
        let built = nornir::<Shape>()
            .use_match("kind", |m| {
                m.arm("circle", |p| p.map(|_| Ok(1)))
                    .fallback(|p| p.map(|_| Ok(0)))
            })
            .build();

        assert!(built.is_ok());
    }

    #[test]
    fn test_unknown_variant_is_build_error() {
        let err = nornir::<Shape>()
            .use_match("kind", |m| {
                m.arm("circle", |p| p.map(|_| Ok(1)))
                    .arm("square", |p| p.map(|_| Ok(2)))
                    .arm("triangle", |p| p.map(|_| Ok(3)))
            })
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("unknown variants: triangle"));
    }

    #[test]
    fn test_duplicate_arm_is_build_error() {
        let err = nornir::<Value>()
            .use_match("type", |m| {
                m.arm("a", |p| p.map(|_| Ok(1)))
                    .arm("a", |p| p.map(|_| Ok(2)))
            })
            .build()
            .unwrap_err();

        assert_eq!(err.to_string(), "build error: duplicate match arm `a`");
    }

    #[test]
    fn test_empty_table_is_build_error() {
        let err = nornir::<Value>()
            .use_match("type", |m: MatchBuilder<Value, i32>| m)
            .build()
            .unwrap_err();

        assert!(err.is_build());
    }

    #[tokio::test]
    async fn test_open_union_no_match() {
        let handler = nornir::<Value>()
            .use_match("type", |m| m.arm("T1", |p| p.map(|_| Ok("one"))))
            .build()
            .unwrap();

        let err = handler.call(json!({"type": "T9"})).await.unwrap_err();
        assert!(err.is_no_match());
        assert_eq!(err.to_string(), "no match for tag: T9");

        let err = handler.call(json!({"other": 1})).await.unwrap_err();
        assert_eq!(err.to_string(), "no match for tag: <none>");
    }

    #[tokio::test]
    async fn test_fallback_runs_for_unmatched_tag() {
        let handler = nornir::<Value>()
            .use_match("type", |m| {
                m.arm("T1", |p| p.map(|_| Ok("one")))
                    .fallback(|p| p.map(|_| Ok("other")))
            })
            .build()
            .unwrap();

        assert_eq!(handler.call(json!({"type": "T1"})).await.unwrap(), "one");
        assert_eq!(handler.call(json!({"type": "T2"})).await.unwrap(), "other");
    }

    proptest! {
        #[test]
        fn prop_only_matching_arm_runs(first in any::<bool>(), n in any::<i64>()) {
            let calls = std::sync::Arc::new(Mutex::new(Vec::new()));
            let t1 = std::sync::Arc::clone(&calls);
            let t2 = std::sync::Arc::clone(&calls);

            let handler = nornir::<Value>()
                .use_match("type", move |m| {
                    m.arm("T1", move |p| p.map(move |_| { t1.lock().push("T1"); Ok(()) }))
                        .arm("T2", move |p| p.map(move |_| { t2.lock().push("T2"); Ok(()) }))
                })
                .build()
                .unwrap();

            let tag = if first { "T1" } else { "T2" };
            tokio_test::block_on(handler.call(json!({"type": tag, "n": n}))).unwrap();

            prop_assert_eq!(calls.lock().clone(), vec![tag]);
        }
    }
}
