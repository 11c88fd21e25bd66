use shadow_rs::ShadowBuilder;

fn main() {
    if let Err(err) = ShadowBuilder::builder().build() {
        panic!("failed to generate build metadata: {err}");
    }
}
