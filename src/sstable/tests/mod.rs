mod helpers;

mod tests_index;
