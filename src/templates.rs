pub const GENERATED_BANNER: &str = include_str!("templates/generated-banner.tmpl");
pub const UNIT_TEST_BANNER: &str = include_str!("templates/unit-test-banner.tmpl");

pub const SIMULATORS_MANIFEST: &str = include_str!("templates/simh-simulators.cmake.tmpl");
