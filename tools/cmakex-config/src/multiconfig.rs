/// Closed list of multi-configuration generator name prefixes (spec 4.I, GLOSSARY
/// "Multi-configuration generator"). A multi-configuration generator's single binary
/// directory contains all configurations; single-configuration generators need either
/// one binary directory per configuration or to serialize configure/build per config.
const MULTI_CONFIG_GENERATOR_PREFIXES: &[&str] = &["Visual Studio", "Xcode", "Ninja Multi-Config"];

/// True if `generator` is a multi-configuration generator, identified by prefix match
/// against a small closed list.
pub fn is_multi_config(generator: &str) -> bool {
    MULTI_CONFIG_GENERATOR_PREFIXES
        .iter()
        .any(|prefix| generator.starts_with(prefix))
}

/// The *effective* per-configuration-binary-directories flag: true iff the user
/// requested per-config directories AND the generator is single-configuration.
/// Multi-configuration generators always force this to false, since they already
/// hold every configuration in one binary directory.
pub fn needs_per_config_binary_dirs(requested: bool, generator: &str) -> bool {
    requested && !is_multi_config(generator)
}
