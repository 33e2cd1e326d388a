//! Test helpers shared by the opshape crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Run each case of a table-driven test, collecting failures.
///
/// A table-driven test declares a `Case` struct deriving `Debug`, builds a
/// collection of cases and passes a test function to one of the methods of
/// this trait:
///
/// ```
/// use opshape_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     input: usize,
///     stride: usize,
///     expected: usize,
/// }
///
/// let cases = [
///     Case { input: 7, stride: 2, expected: 4 },
///     Case { input: 8, stride: 2, expected: 4 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.input.div_ceil(case.stride), case.expected);
/// });
/// ```
///
/// Every case runs even if an earlier one panics. Afterwards the method
/// panics with the number of failed cases and their debug representations.
///
/// Cases and the test function must be unwind safe. Wrap a field in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe) or construct it inside
/// the test function if that is not the case.
pub trait TestCases {
    type Case;

    /// Call `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Call `test` with a clone of each case.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Call `test` with each case by value.
    ///
    /// The case is formatted before the call so that it can be reported if
    /// the test fails.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Panic with a summary if any cases failed.
fn report_failures<T: Debug>(failures: Vec<T>) {
    assert!(
        failures.is_empty(),
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        report_failures(failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| {
                let value = case.clone();
                std::panic::catch_unwind(move || test(value)).is_err()
            })
            .collect();
        report_failures(failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<String> = self
            .into_iter()
            .filter_map(|case| {
                let desc = format!("{:?}", case);
                std::panic::catch_unwind(move || test(case))
                    .is_err()
                    .then_some(desc)
            })
            .collect();
        report_failures(failures);
    }
}
