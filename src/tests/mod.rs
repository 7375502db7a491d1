mod test_window_counter;
