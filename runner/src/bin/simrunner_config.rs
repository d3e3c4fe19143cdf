use nimbus::RunConfig;
use serdeconv;

fn main() {
    let config =
        serdeconv::to_toml_string(&RunConfig::default()).expect("Failed to generate config file");

    println!("{}", config);
}
