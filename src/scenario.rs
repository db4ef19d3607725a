use std::{future::Future, marker::PhantomData};

use typed_builder::TypedBuilder;

use crate::aggregate::Aggregate;

/// What one virtual user does on every iteration.
///
/// `action` is cloned into each virtual user, so heavy resources such as HTTP
/// clients belong outside of it and should be cheap to clone.
#[derive(Clone, TypedBuilder)]
pub struct Scenario<A, F, Fut>
where
    A: Aggregate,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    #[builder(setter(into))]
    pub name: String,
    pub action: F,
    #[builder(default, setter(skip))]
    marker: PhantomData<fn() -> (A, Fut)>,
}
