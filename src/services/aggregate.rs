//! Fan-in of parallel branch results without losing errors.
//!
//! A branch yields `Ok(items)` or one error. Combining keeps every item when
//! all branches succeed, and every error when any branch fails. `merge` is
//! associative with `Ok(vec![])` as identity, and commutative up to the order
//! of elements, so branches may be folded in completion order.

/// Combined outcome of zero or more branches.
pub type Gathered<T, E> = Result<Vec<T>, Vec<E>>;

/// Combine two partial outcomes.
pub fn merge<T, E>(left: Gathered<T, E>, right: Gathered<T, E>) -> Gathered<T, E> {
    match (left, right) {
        (Ok(mut items), Ok(more)) => {
            items.extend(more);
            Ok(items)
        }
        (Ok(_), Err(errors)) | (Err(errors), Ok(_)) => Err(errors),
        (Err(mut errors), Err(more)) => {
            errors.extend(more);
            Err(errors)
        }
    }
}

/// Fold branch outcomes into one.
pub fn gather<T, E, I>(branches: I) -> Gathered<T, E>
where
    I: IntoIterator<Item = Gathered<T, E>>,
{
    branches.into_iter().fold(Ok(Vec::new()), merge)
}

/// Lift a single-error branch result.
pub fn single<T, E>(branch: Result<Vec<T>, E>) -> Gathered<T, E> {
    branch.map_err(|err| vec![err])
}
