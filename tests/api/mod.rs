mod rooms_tests;
