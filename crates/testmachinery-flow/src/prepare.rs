//! Steps synthesized around the user's branches.
//!
//! Every flow starts with a bootstrap step that writes the kubeconfigs and
//! global config into the shared environment. The exit flow additionally ends
//! with a teardown step that collects results once all cleanup ran.

use testmachinery_types::TestDefinition;

use crate::credentials::KUBECONFIG_PATH;

/// Name of the bootstrap step's test definition.
pub const PREPARE_NAME: &str = "prepare";

/// Name of the exit flow's teardown step's test definition.
pub const POST_PREPARE_NAME: &str = "post-prepare";

const PREPARE_BINARY: &str = "/testmachinery/prepare";

/// The bootstrap step run before the first step of every branch.
pub fn bootstrap(image: &str) -> TestDefinition {
    let mut definition = TestDefinition::new(PREPARE_NAME, image).with_command(&[PREPARE_BINARY]);
    definition.description = "Prepare the test environment".to_string();
    definition.args = vec![
        "--kubeconfig-dir".to_string(),
        KUBECONFIG_PATH.to_string(),
    ];
    definition
}

/// The teardown step run after every sink step of the exit flow.
pub fn teardown(image: &str) -> TestDefinition {
    let mut definition =
        TestDefinition::new(POST_PREPARE_NAME, image).with_command(&[PREPARE_BINARY]);
    definition.description = "Collect results and clean up the test environment".to_string();
    definition.args = vec!["--post".to_string()];
    definition
}
