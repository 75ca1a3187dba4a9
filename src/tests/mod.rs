mod live_tests;
