use stubs::error::ExprError;
use stubs::expr::Expr;
use stubs::units::Unit;
use util::assert_scalar_close;

fn env<'a>(values: &'a [(&'a str, f64)]) -> impl 'a + Fn(&str) -> Option<f64> {
    move |s: &str| values.iter().find(|(name, _)| *name == s).map(|(_, v)| *v)
}

#[test]
fn derivative_of_mass_action_rate() {
    let rate = Expr::parse("k_on * A * B").unwrap();
    let values = [("k_on", 2.0), ("A", 3.0), ("B", 5.0)];
    let d_a = rate.diff("A");
    let d_b = rate.diff("B");
    assert_scalar_close!(d_a.eval(&env(&values)).unwrap(), 10.0, reltol = 1e-14);
    assert_scalar_close!(d_b.eval(&env(&values)).unwrap(), 6.0, reltol = 1e-14);
    assert!(rate.diff("C").is_zero());
}

#[test]
fn derivative_of_saturating_rate() {
    // Michaelis-Menten: d/dS (V S / (K + S)) = V K / (K + S)^2
    let rate = Expr::parse("V*S/(K + S)").unwrap();
    let values = [("V", 4.0), ("S", 1.0), ("K", 3.0)];
    let expected = 4.0 * 3.0 / 16.0;
    assert_scalar_close!(rate.diff("S").eval(&env(&values)).unwrap(), expected, reltol = 1e-14);
}

#[test]
fn linearity_follows_second_derivative() {
    let rate = Expr::parse("k*A*B + c*exp(B)").unwrap();
    assert!(rate.is_linear_in("A"));
    assert!(!rate.is_linear_in("B"));
    assert!(Expr::parse("A^2").unwrap().diff("A").diff("A").eval(&env(&[("A", 7.0)])).unwrap() == 2.0);
    assert!(!Expr::parse("A^2").unwrap().is_linear_in("A"));
    assert!(Expr::parse("heaviside(t - 1) * A").unwrap().is_linear_in("A"));
}

#[test]
fn compiled_expression_matches_tree_evaluation() {
    let expr = Expr::parse("k*A^2/(1 + B) - sqrt(A)*heaviside(B - 0.5)").unwrap();
    let symbols = ["k", "A", "B"];
    let compiled = expr.compile(&symbols).unwrap();
    for (a, b) in [(1.0, 0.0), (4.0, 1.0), (0.25, 3.0)] {
        let values = [("k", 1.5), ("A", a), ("B", b)];
        let expected = expr.eval(&env(&values)).unwrap();
        assert_scalar_close!(compiled.eval(&[1.5, a, b]), expected, reltol = 1e-14);
    }
}

#[test]
fn compiling_with_missing_symbol_fails() {
    let expr = Expr::parse("k*A").unwrap();
    assert!(matches!(expr.compile(&["k"]), Err(ExprError::UnknownSymbol(s)) if s == "A"));
}

#[test]
fn free_symbols_are_sorted_and_unique() {
    let expr = Expr::parse("b*a + a*exp(c)").unwrap();
    let symbols: Vec<String> = expr.free_symbols().into_iter().collect();
    assert_eq!(symbols, ["a", "b", "c"]);
}

#[test]
fn unit_derivation_converts_addends() {
    let units = |s: &str| match s {
        "A" => Unit::parse("uM").ok(),
        "B" => Unit::parse("nM").ok(),
        "k" => Unit::parse("1/s").ok(),
        _ => None,
    };
    let expr = Expr::parse("k*(A + B)").unwrap();
    let (converted, unit) = expr.with_units(&units).unwrap();
    assert!(unit.is_dimensionally(&Unit::parse("uM/s").unwrap()));
    assert_scalar_close!(unit.conversion_factor_to(&Unit::parse("uM/s").unwrap()).unwrap(), 1.0, reltol = 1e-12);

    // 1 uM + 1000 nM = 2 uM
    let value = converted
        .eval(&env(&[("k", 1.0), ("A", 1.0), ("B", 1000.0)]))
        .unwrap();
    assert_scalar_close!(value, 2.0, reltol = 1e-12);
}

#[test]
fn unit_derivation_rejects_mismatched_addends() {
    let units = |s: &str| match s {
        "A" => Unit::parse("uM").ok(),
        "k" => Unit::parse("1/s").ok(),
        _ => None,
    };
    let expr = Expr::parse("A + k").unwrap();
    assert!(matches!(expr.with_units(&units), Err(ExprError::IncompatibleAddends { .. })));
}
