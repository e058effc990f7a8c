#[macro_export]
macro_rules! test_state {
    (:: $dir:ident = []) => (());
    (:: $dir:ident = [ $file:expr => $content:expr ]) => {
        {
            let path = $dir.path().join($file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("the parent directory should be created");
            }

            std::fs::write(&path, $content).expect("the file should be written");
        }
    };

    (:: $dir:ident = [ $file:expr => $content:expr, $($rest_file:expr => $rest_content:expr),* ]) => {
        test_state!(:: $dir = [ $file => $content ]);
        test_state!(:: $dir = [ $($rest_file => $rest_content),* ]);
    };

    ($state:ident = [ $($file:expr => $content:expr),* ]) => {
        let public_dir = tempfile::tempdir().expect("a temporary public directory");

        test_state!(:: public_dir = [ $($file => $content),* ]);

        let $state = $crate::models::GlobalState::new(public_dir.path());
    }
}

#[macro_export]
macro_rules! test_request {

    ($method:ident $path:expr => $status:ident | state = $state:ident) => {
        {
            let app = $crate::api::test::get_test_app($state.clone()).await;
            let req = actix_web::test::TestRequest::with_uri($path)
                .method(http::Method::$method)
                .insert_header(("Host", "feeds.example.com"))
                .insert_header(("User-Agent", "Test"))
                .to_request();

            let response = actix_web::test::call_service(&app, req).await;
            $crate::api::test::assert_status(response, http::StatusCode::$status).await
        }
    };

    ($method:ident $path:expr => $status:ident with content | state = $state:ident) => {
        {
            let response = test_request!($method $path => $status | state = $state);
            $crate::api::test::get_content(response).await
        }
    };

    ($method:ident $path:expr => $status:ident with location = $location:literal | state = $state:ident) => {
        {
            let response = test_request!($method $path => $status | state = $state);
            $crate::api::test::assert_location_header(response.headers(), $location);
            response
        }
    };

    /* --------------- NO GLOBAL STATE ------------------ */

    ($method:ident $path:expr => $status:ident) => {
        {
            test_state!(state = []);

            test_request!($method $path => $status | state = state)
        }
    };

    ($method:ident $path:expr => $status:ident with content) => {
        {
            let response = test_request!($method $path => $status);
            $crate::api::test::get_content(response).await
        }
    };
}
