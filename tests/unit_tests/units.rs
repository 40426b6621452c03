use proptest::prelude::*;
use stubs::error::ModelError;
use stubs::model::species::Species;
use stubs::units::{Dimension, Unit, AVOGADRO};
use util::assert_scalar_close;

#[test]
fn common_units_parse_with_scale() {
    let micromolar = Unit::parse("uM").unwrap();
    assert_scalar_close!(micromolar.scale(), 1e-3, reltol = 1e-12);
    assert!(micromolar.is_dimensionally(&Unit::parse("mol/m^3").unwrap()));

    let diffusion = Unit::parse("um**2/s").unwrap();
    assert_scalar_close!(diffusion.scale(), 1e-12, reltol = 1e-12);

    let rate = Unit::parse("1/(uM*s)").unwrap();
    assert_scalar_close!(rate.scale(), 1e3, reltol = 1e-12);

    let density = Unit::parse("molecule/um^2").unwrap();
    assert_scalar_close!(density.scale(), 1e12 / AVOGADRO, reltol = 1e-12);
    assert!(density.is_dimensionally(&Unit::parse("mol/m^2").unwrap()));
}

#[test]
fn membrane_flux_converts_between_concentration_units() {
    // uM * um / s expressed in mol / (m^2 s)
    let flux = Unit::parse("uM*um/s").unwrap();
    let si = Unit::parse("mol/(m^2*s)").unwrap();
    assert_scalar_close!(flux.conversion_factor_to(&si).unwrap(), 1e-9, reltol = 1e-12);
    assert!(flux.conversion_factor_to(&Unit::parse("uM/s").unwrap()).is_err());
}

#[test]
fn malformed_units_are_rejected() {
    assert!(Unit::parse("um^").is_err());
    assert!(Unit::parse("(uM").is_err());
    assert!(Unit::parse("parsec").is_err());
}

#[test]
fn surface_species_accepts_areal_concentration() {
    let species = Species::new("B", 0.0, "mol/m^2", 1.0, "m^2/s", "pm").unwrap();
    assert_eq!(species.concentration_dimension(), 2);
}

#[test]
fn mass_concentration_is_rejected() {
    let result = Species::new("X", 0.0, "kg/m^3", 1.0, "m^2/s", "cytosol");
    assert!(matches!(result, Err(ModelError::InvalidSpecies { .. })));
}

#[test]
fn negative_values_are_rejected() {
    assert!(Species::new("X", -1.0, "uM", 1.0, "um^2/s", "cytosol").is_err());
    assert!(Species::new("X", 1.0, "uM", -1.0, "um^2/s", "cytosol").is_err());
    assert!(Species::new("X", 1.0, "uM", 1.0, "um/s", "cytosol").is_err());
}

fn dimension(length: i32, time: i32, substance: i32) -> Dimension {
    Dimension::length().powi(length) * Dimension::time().powi(time) * Dimension::substance().powi(substance)
}

proptest! {
    #[test]
    fn conversion_factors_compose(
        length in -3i32..=3,
        time in -2i32..=2,
        substance in -1i32..=1,
        a in -6i32..=6,
        b in -6i32..=6,
    ) {
        let dim = dimension(length, time, substance);
        let x = Unit::new(10f64.powi(a), dim);
        let y = Unit::new(10f64.powi(b), dim);
        let z = Unit::new(1.0, dim);
        let direct = x.conversion_factor_to(&z).unwrap();
        let via = x.conversion_factor_to(&y).unwrap() * y.conversion_factor_to(&z).unwrap();
        prop_assert!((direct - via).abs() <= 1e-12 * direct.abs());
    }

    #[test]
    fn product_and_quotient_cancel(
        length in -3i32..=3,
        time in -2i32..=2,
        a in -6i32..=6,
        b in -6i32..=6,
    ) {
        let x = Unit::new(10f64.powi(a), dimension(length, time, 0));
        let y = Unit::new(10f64.powi(b), dimension(time, length, 1));
        let roundtrip = x * y / y;
        prop_assert!(roundtrip.is_dimensionally(&x));
        let factor = roundtrip.conversion_factor_to(&x).unwrap();
        prop_assert!((factor - 1.0).abs() <= 1e-12);
    }
}
