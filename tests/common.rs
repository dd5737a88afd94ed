use retrograd::Variable;

// Helper to create an f32 leaf with gradient tracking enabled.
// Allowed dead_code because usage across separate test crates isn't detected.
#[allow(dead_code)]
pub(crate) fn tracked_leaf(data: Vec<f32>, shape: Vec<usize>) -> Variable<f32> {
    let mut v = Variable::new(data, shape).expect("test variable creation failed");
    v.set_requires_grad(true)
        .expect("enabling gradient tracking failed");
    v
}
