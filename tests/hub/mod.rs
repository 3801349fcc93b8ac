mod broadcast_tests;
mod scenario_tests;
